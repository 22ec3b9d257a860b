//! DHCP server implementation
//!
//! This module provides the DHCP engine that answers booting machines,
//! registers them as nodes and hands out PXE boot options.

use crate::boot::BootOptions;
use crate::config::{DhcpConfig, DhcpMode};
use crate::error::{DhcpError, Result};
use crate::packet::{encode, DhcpRequest, DhcpResponseBuilder};
use crate::pool::LeasePool;
use async_trait::async_trait;
use dhcproto::v4::{Message, MessageType};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const DHCP_SERVER_PORT: u16 = 67;
const DHCP_CLIENT_PORT: u16 = 68;

/// Trait for recording machines seen on the wire
#[async_trait]
pub trait NodeRegistry: Send + Sync {
    /// Create the node as discovered if it is new; record `client_ip` if set.
    ///
    /// Must never change the status of an existing node.
    async fn record_discovery(&self, mac: &str, client_ip: Option<Ipv4Addr>) -> Result<()>;
}

/// Event emitted by the DHCP server
#[derive(Debug, Clone)]
pub enum DhcpEvent {
    /// Server started
    Started { bind_addr: SocketAddr },
    /// Received a DHCP request
    Request {
        mac: String,
        message_type: String,
        is_pxe: bool,
    },
    /// Sent a DHCP response
    Response {
        mac: String,
        message_type: String,
        offered_ip: Option<Ipv4Addr>,
        destination: SocketAddr,
    },
    /// A request was dropped while building the response
    Dropped { mac: String, reason: String },
    /// Server stopped
    Stopped,
}

/// A reply ready to go on the wire
#[derive(Debug, Clone)]
pub struct DhcpReply {
    pub message: Message,
    pub message_type: MessageType,
    pub offered_ip: Option<Ipv4Addr>,
    pub destination: SocketAddr,
}

/// DHCP server
pub struct DhcpServer {
    config: DhcpConfig,
    registry: Arc<dyn NodeRegistry>,
    pool: Option<Arc<LeasePool>>,
    event_sender: broadcast::Sender<DhcpEvent>,
}

impl DhcpServer {
    /// Create a new DHCP server
    ///
    /// Without a pool, standard mode echoes the client's requested or
    /// current address back with the fallback lease time.
    pub fn new(
        config: DhcpConfig,
        registry: Arc<dyn NodeRegistry>,
        pool: Option<Arc<LeasePool>>,
    ) -> Self {
        let (event_sender, _) = broadcast::channel(1024);
        Self {
            config,
            registry,
            pool,
            event_sender,
        }
    }

    /// Subscribe to server events
    pub fn subscribe(&self) -> broadcast::Receiver<DhcpEvent> {
        self.event_sender.subscribe()
    }

    pub fn config(&self) -> &DhcpConfig {
        &self.config
    }

    pub fn pool(&self) -> Option<&Arc<LeasePool>> {
        self.pool.as_ref()
    }

    /// Run the DHCP server until `shutdown` flips to true
    ///
    /// Each datagram is handled on its own task. On shutdown in-flight
    /// tasks are aborted and the socket is closed before returning.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let socket = Arc::new(self.create_socket()?);
        let bind_addr = socket.local_addr()?;

        info!(addr = %bind_addr, mode = ?self.config.mode, "DHCP server started");
        let _ = self.event_sender.send(DhcpEvent::Started { bind_addr });

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut buf = [0u8; 1500];

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, src)) => {
                            let server = Arc::clone(&self);
                            let socket = Arc::clone(&socket);
                            let data = buf[..len].to_vec();
                            tasks.spawn(async move { server.handle_packet(&socket, &data, src).await });
                        }
                        Err(e) => {
                            error!(error = %e, "Error receiving packet");
                        }
                    }
                }
                Some(joined) = tasks.join_next() => {
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => error!(error = %e, "Error handling DHCP packet"),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => error!(error = %e, "DHCP packet task failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // sender gone, nobody can stop us any other way
                        break;
                    }
                }
            }
        }

        info!("DHCP server shutting down");
        tasks.shutdown().await;
        drop(socket);
        let _ = self.event_sender.send(DhcpEvent::Stopped);

        Ok(())
    }

    /// Create and configure the UDP socket
    fn create_socket(&self) -> Result<UdpSocket> {
        let bind_addr = self.config.bind_addr;
        let bind_failed = |source| DhcpError::BindFailed {
            addr: bind_addr,
            source,
        };

        let socket = socket2::Socket::new(
            socket2::Domain::IPV4,
            socket2::Type::DGRAM,
            Some(socket2::Protocol::UDP),
        )
        .map_err(bind_failed)?;

        socket.set_reuse_address(true).map_err(bind_failed)?;
        socket.set_broadcast(true).map_err(bind_failed)?;

        #[cfg(target_os = "linux")]
        if let Some(interface) = &self.config.interface {
            socket
                .bind_device(Some(interface.as_bytes()))
                .map_err(bind_failed)?;
        }
        #[cfg(not(target_os = "linux"))]
        if let Some(interface) = &self.config.interface {
            warn!(interface = %interface, "Interface binding unsupported here, listening on all interfaces");
        }

        socket.bind(&bind_addr.into()).map_err(bind_failed)?;

        // Set non-blocking for tokio
        socket.set_nonblocking(true).map_err(bind_failed)?;

        let std_socket: std::net::UdpSocket = socket.into();
        UdpSocket::from_std(std_socket).map_err(bind_failed)
    }

    /// Handle an incoming DHCP packet
    async fn handle_packet(&self, socket: &UdpSocket, data: &[u8], src: SocketAddr) -> Result<()> {
        let request = match DhcpRequest::parse(data) {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, src = %src, "Ignoring DHCP packet");
                return Ok(());
            }
        };

        debug!(
            mac = %request.mac_address,
            msg_type = ?request.message_type,
            arch = ?request.arch(),
            is_ipxe = request.is_ipxe,
            "Received DHCP request"
        );

        let _ = self.event_sender.send(DhcpEvent::Request {
            mac: request.mac_address.clone(),
            message_type: format!("{:?}", request.message_type),
            is_pxe: request.is_pxe_request(),
        });

        let reply = match self.handle_request(&request).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(mac = %request.mac_address, error = %e, "Dropping DHCP request");
                let _ = self.event_sender.send(DhcpEvent::Dropped {
                    mac: request.mac_address,
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        let bytes = encode(&reply.message)?;
        socket.send_to(&bytes, reply.destination).await?;

        info!(
            mac = %request.mac_address,
            msg_type = ?reply.message_type,
            offered_ip = ?reply.offered_ip,
            dest = %reply.destination,
            "Sent DHCP response"
        );

        let _ = self.event_sender.send(DhcpEvent::Response {
            mac: request.mac_address,
            message_type: format!("{:?}", reply.message_type),
            offered_ip: reply.offered_ip,
            destination: reply.destination,
        });

        Ok(())
    }

    /// Decide on and build the reply for one request
    ///
    /// `Ok(None)` means the message is not one this mode answers.
    pub async fn handle_request(&self, request: &DhcpRequest) -> Result<Option<DhcpReply>> {
        match self.config.mode {
            DhcpMode::Standard => self.handle_standard(request).await,
            DhcpMode::Proxy => self.handle_proxy(request).await,
        }
    }

    /// Standard mode: OFFER for DISCOVER, ACK for REQUEST
    async fn handle_standard(&self, request: &DhcpRequest) -> Result<Option<DhcpReply>> {
        let reply_type = match request.message_type {
            MessageType::Discover => MessageType::Offer,
            MessageType::Request => MessageType::Ack,
            _ => return Ok(None),
        };

        self.registry
            .record_discovery(&request.mac_address, request.current_ip())
            .await?;

        let mut builder =
            DhcpResponseBuilder::new(request, reply_type.clone(), self.config.server_ip);

        let offered_ip = match &self.pool {
            Some(pool) => {
                let ip = match request.message_type {
                    MessageType::Discover => {
                        pool.allocate(&request.mac_address, request.requested_ip)?
                    }
                    _ => pool.get_lease(&request.mac_address)?,
                };

                builder = builder
                    .with_subnet_mask(pool.netmask())
                    .with_dns_servers(pool.dns_servers().to_vec())
                    .with_lease_time(pool.lease_time());
                if let Some(gateway) = pool.gateway() {
                    builder = builder.with_gateway(gateway);
                }
                Some(ip)
            }
            None => {
                builder = builder.with_lease_time(self.config.fallback_lease_time);
                request.requested_ip.or_else(|| request.current_ip())
            }
        };

        if let Some(ip) = offered_ip {
            builder = builder.with_offered_ip(ip);
        }

        let message = builder.with_boot_options(self.boot_options(request)).build();

        Ok(Some(DhcpReply {
            message,
            message_type: reply_type,
            offered_ip,
            destination: self.destination(request),
        }))
    }

    /// Proxy mode: boot options only, DISCOVER only
    async fn handle_proxy(&self, request: &DhcpRequest) -> Result<Option<DhcpReply>> {
        if request.message_type != MessageType::Discover {
            return Ok(None);
        }

        self.registry
            .record_discovery(&request.mac_address, None)
            .await?;

        let message = DhcpResponseBuilder::new(request, MessageType::Offer, self.config.server_ip)
            .with_boot_options(self.boot_options(request))
            .with_broadcast_addr(Ipv4Addr::BROADCAST)
            .with_pxe_vendor_options()
            .build();

        Ok(Some(DhcpReply {
            message,
            message_type: MessageType::Offer,
            offered_ip: None,
            destination: self.destination(request),
        }))
    }

    /// Chainloader for firmware clients, the boot script URL for iPXE
    fn boot_options(&self, request: &DhcpRequest) -> BootOptions {
        match (&self.config.ipxe_script_url, request.is_ipxe) {
            (Some(url), true) => BootOptions::for_ipxe(self.config.tftp_server, url.clone()),
            _ => BootOptions::for_firmware(
                &self.config.boot_files,
                self.config.tftp_server,
                request.client_arch,
            ),
        }
    }

    fn destination(&self, request: &DhcpRequest) -> SocketAddr {
        if request.is_relayed() {
            // Relayed request - send to relay agent
            return SocketAddr::from((request.relay_ip, DHCP_SERVER_PORT));
        }
        match (self.config.mode, request.current_ip()) {
            (DhcpMode::Standard, Some(ip)) => SocketAddr::from((ip, DHCP_CLIENT_PORT)),
            _ => SocketAddr::from((Ipv4Addr::BROADCAST, DHCP_CLIENT_PORT)),
        }
    }
}

impl std::fmt::Debug for DhcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhcpServer")
            .field("config", &self.config)
            .field("pool", &self.pool.is_some())
            .finish_non_exhaustive()
    }
}
