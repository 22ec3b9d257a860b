//! DHCP server configuration
//!
//! This module provides configuration types for the DHCP engine:
//! operating mode, socket settings and boot options. Address pool
//! settings live with the pool itself (see [`crate::pool::PoolConfig`]).

use crate::boot::BootFiles;
use std::net::{Ipv4Addr, SocketAddr};

/// DHCP server operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DhcpMode {
    /// Authoritative DHCP server
    ///
    /// Answers DISCOVER with OFFER and REQUEST with ACK, assigning
    /// addresses from the lease pool when one is configured.
    #[default]
    Standard,

    /// Proxy DHCP mode (works alongside existing DHCP)
    ///
    /// Only answers DISCOVER, never assigns an address and broadcasts
    /// boot options. Use when another DHCP server handles IP assignment.
    Proxy,
}

/// DHCP server configuration
#[derive(Debug, Clone)]
pub struct DhcpConfig {
    /// Server operating mode
    pub mode: DhcpMode,

    /// Interface to bind to (e.g., "eth0")
    /// If None, listens on all interfaces
    pub interface: Option<String>,

    /// Socket address to listen on
    pub bind_addr: SocketAddr,

    /// Server identifier (option 54)
    pub server_ip: Ipv4Addr,

    /// TFTP server IP (siaddr and option 66)
    pub tftp_server: Option<Ipv4Addr>,

    /// Chainloader file names
    pub boot_files: BootFiles,

    /// Boot script URL handed to iPXE clients; `${mac}` is expanded by iPXE
    pub ipxe_script_url: Option<String>,

    /// Lease time sent when no pool is configured
    pub fallback_lease_time: u32,
}

impl Default for DhcpConfig {
    fn default() -> Self {
        Self {
            mode: DhcpMode::Standard,
            interface: None,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 67)),
            server_ip: Ipv4Addr::UNSPECIFIED,
            tftp_server: None,
            boot_files: BootFiles::default(),
            ipxe_script_url: None,
            fallback_lease_time: 86400, // 24 hours
        }
    }
}

impl DhcpConfig {
    /// Create a new DHCP config with server IP
    ///
    /// The TFTP server defaults to the same address.
    pub fn new(server_ip: Ipv4Addr) -> Self {
        Self {
            server_ip,
            tftp_server: Some(server_ip),
            ..Default::default()
        }
    }

    /// Set the operating mode
    pub fn with_mode(mut self, mode: DhcpMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the interface to bind to
    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    /// Set the listen address
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the TFTP server
    pub fn with_tftp_server(mut self, server: Ipv4Addr) -> Self {
        self.tftp_server = Some(server);
        self
    }

    /// Set the chainloader file names
    pub fn with_boot_files(mut self, files: BootFiles) -> Self {
        self.boot_files = files;
        self
    }

    /// Set the iPXE script URL
    pub fn with_ipxe_script_url(mut self, url: impl Into<String>) -> Self {
        self.ipxe_script_url = Some(url.into());
        self
    }

    /// Boot script URL for a server reachable at `server_addr` (host:port).
    pub fn script_url_for(server_addr: &str) -> String {
        format!("http://{}/boot/${{mac}}/boot.ipxe", server_addr)
    }
}
