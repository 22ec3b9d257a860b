//! Network services runner
//!
//! Starts the DHCP server next to the HTTP surface and watches its event
//! stream. The server is optional: it is skipped when disabled or when no
//! IPv4 address for this host can be worked out from the configuration.

use crate::config::ServerConfig;
use crate::registry::StoreRegistry;
use crate::store::NodeStore;
use nodefoundry_dhcp::{DhcpConfig, DhcpEvent, DhcpServer, LeasePool};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Starts and tracks the network services
pub struct ServiceRunner {
    dhcp: Option<DhcpConfig>,
    store: Arc<dyn NodeStore>,
    pool: Option<Arc<LeasePool>>,
}

/// Handles to running services
#[derive(Default)]
pub struct ServiceHandles {
    pub dhcp: Option<ServiceHandle<DhcpEvent>>,
}

/// Handle to a single service
pub struct ServiceHandle<E> {
    pub events: broadcast::Receiver<E>,
    pub join_handle: JoinHandle<()>,
}

impl ServiceHandles {
    /// Wait for every service task to finish.
    pub async fn join(self) {
        if let Some(dhcp) = self.dhcp {
            if let Err(e) = dhcp.join_handle.await {
                error!(error = %e, "DHCP task failed");
            }
        }
    }
}

impl ServiceRunner {
    pub fn new(
        dhcp: Option<DhcpConfig>,
        store: Arc<dyn NodeStore>,
        pool: Option<Arc<LeasePool>>,
    ) -> Self {
        Self { dhcp, store, pool }
    }

    /// Build the runner from server configuration
    pub fn from_config(
        config: &ServerConfig,
        store: Arc<dyn NodeStore>,
        pool: Option<Arc<LeasePool>>,
    ) -> Self {
        let dhcp = if config.dhcp_disabled {
            info!("DHCP server disabled");
            None
        } else {
            let dhcp = config.dhcp_config();
            if dhcp.is_none() {
                warn!(
                    server_addr = %config.advertised_addr(),
                    "Cannot determine an IPv4 server address, DHCP server not started; set NF_SERVER_ADDR"
                );
            }
            dhcp
        };
        Self::new(dhcp, store, pool)
    }

    /// Start all configured services
    pub fn start(&self, shutdown: watch::Receiver<bool>) -> ServiceHandles {
        let mut handles = ServiceHandles::default();

        if let Some(config) = &self.dhcp {
            let (server, join_handle) = self.start_dhcp(config.clone(), shutdown);
            spawn_event_logger(server.subscribe());
            handles.dhcp = Some(ServiceHandle {
                events: server.subscribe(),
                join_handle,
            });
        }

        handles
    }

    fn start_dhcp(
        &self,
        config: DhcpConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<DhcpServer>, JoinHandle<()>) {
        info!(
            bind = %config.bind_addr,
            server_ip = %config.server_ip,
            mode = ?config.mode,
            pool = self.pool.is_some(),
            "Starting DHCP server"
        );

        let registry = Arc::new(StoreRegistry::new(self.store.clone()));
        let server = Arc::new(DhcpServer::new(config, registry, self.pool.clone()));
        let server_clone = server.clone();

        let handle = tokio::spawn(async move {
            if let Err(e) = server_clone.run(shutdown).await {
                error!(error = %e, "DHCP server error");
            }
        });

        (server, handle)
    }
}

/// Log DHCP events until the server stops.
fn spawn_event_logger(mut events: broadcast::Receiver<DhcpEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DhcpEvent::Started { bind_addr }) => {
                    debug!(addr = %bind_addr, "DHCP event stream open");
                }
                Ok(DhcpEvent::Request {
                    mac,
                    message_type,
                    is_pxe,
                }) => {
                    debug!(mac = %mac, message_type = %message_type, pxe = is_pxe, "DHCP request");
                }
                Ok(DhcpEvent::Response {
                    mac,
                    message_type,
                    offered_ip,
                    destination,
                }) => {
                    debug!(
                        mac = %mac,
                        message_type = %message_type,
                        ip = ?offered_ip,
                        to = %destination,
                        "DHCP response sent"
                    );
                }
                Ok(DhcpEvent::Dropped { mac, reason }) => {
                    warn!(mac = %mac, reason = %reason, "DHCP request dropped");
                }
                Ok(DhcpEvent::Stopped) => {
                    debug!("DHCP event stream closed");
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "DHCP event logger lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[tokio::test]
    async fn test_no_services_without_dhcp_config() {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
        let (_tx, rx) = watch::channel(false);

        let handles = ServiceRunner::new(None, store, None).start(rx);
        assert!(handles.dhcp.is_none());
        handles.join().await;
    }

    #[tokio::test]
    async fn test_dhcp_service_lifecycle() {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryStore::new());
        let config = DhcpConfig::new(Ipv4Addr::LOCALHOST)
            .with_bind_addr("127.0.0.1:0".parse().unwrap());
        let (tx, rx) = watch::channel(false);

        let handles = ServiceRunner::new(Some(config), store, None).start(rx);
        let mut events = handles.dhcp.as_ref().unwrap().events.resubscribe();

        let started = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(started, DhcpEvent::Started { .. }));

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handles.join())
            .await
            .unwrap();
    }
}
