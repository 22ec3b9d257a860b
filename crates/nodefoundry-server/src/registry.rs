//! DHCP → store adapter
//!
//! Lets the DHCP engine record machines it hears from without knowing
//! anything about storage.

use crate::store::{NodeStore, StoreError};
use async_trait::async_trait;
use nodefoundry_common::Node;
use nodefoundry_dhcp::{DhcpError, NodeRegistry};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info};

/// [`NodeRegistry`] backed by a [`NodeStore`].
pub struct StoreRegistry {
    store: Arc<dyn NodeStore>,
}

impl StoreRegistry {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }
}

fn registry_error(e: impl std::fmt::Display) -> DhcpError {
    DhcpError::Registry(e.to_string())
}

#[async_trait]
impl NodeRegistry for StoreRegistry {
    async fn record_discovery(
        &self,
        mac: &str,
        client_ip: Option<Ipv4Addr>,
    ) -> nodefoundry_dhcp::Result<()> {
        let mut node = Node::discovered(mac).map_err(registry_error)?;
        node.ip = client_ip.map(|ip| ip.to_string());

        match self.store.create(&node).await {
            Ok(_) => {
                info!(mac = %node.mac, ip = ?client_ip, "New node discovered");
                return Ok(());
            }
            Err(StoreError::AlreadyExists(_)) => {}
            Err(e) => return Err(registry_error(e)),
        }

        // Known node: only the address may change, never the status
        if let Some(ip) = client_ip {
            self.store
                .update(
                    &node.mac,
                    Box::new(move |node: &mut Node| node.ip = Some(ip.to_string())),
                )
                .await
                .map_err(registry_error)?;
            debug!(mac = %node.mac, ip = %ip, "Updated node address from DHCP");
        }
        Ok(())
    }
}
