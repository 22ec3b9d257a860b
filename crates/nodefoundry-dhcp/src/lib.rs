//! NodeFoundry DHCP Server
//!
//! This crate provides the DHCP engine that discovers booting machines,
//! leases them addresses and points them at the iPXE boot chain.
//!
//! # Operating Modes
//!
//! ## Standard Mode (Default)
//! Answers DISCOVER with OFFER and REQUEST with ACK. With a [`LeasePool`]
//! configured, addresses come from the pool; without one the client's own
//! requested/current address is echoed back.
//!
//! ## Proxy Mode
//! Works alongside existing DHCP infrastructure. Only answers DISCOVER,
//! never assigns an address, and broadcasts PXE boot options.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 DhcpServer                          │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │            Mode Handler                       │  │
//! │  │   Standard | Proxy                            │  │
//! │  └───────────────────────────────────────────────┘  │
//! │            │                       │                │
//! │            ▼                       ▼                │
//! │  ┌──────────────────┐   ┌────────────────────────┐  │
//! │  │  NodeRegistry    │   │  LeasePool             │  │
//! │  │  MAC → node      │   │  MAC ↔ IP leases       │  │
//! │  └──────────────────┘   └────────────────────────┘  │
//! │                       │                             │
//! │                       ▼                             │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │         BootOptions (arch → boot file)        │  │
//! │  └───────────────────────────────────────────────┘  │
//! │                       │                             │
//! │                       ▼                             │
//! │  ┌───────────────────────────────────────────────┐  │
//! │  │         DhcpEvent Stream                      │  │
//! │  │   Request | Response | Dropped                │  │
//! │  └───────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use nodefoundry_dhcp::{DhcpConfig, DhcpMode, DhcpServer, LeasePool, PoolConfig};
//! use std::net::Ipv4Addr;
//! use std::sync::Arc;
//!
//! let config = DhcpConfig::new(Ipv4Addr::new(192, 168, 1, 1))
//!     .with_ipxe_script_url(DhcpConfig::script_url_for("192.168.1.1:8080"));
//! let pool = LeasePool::new(&PoolConfig::new("192.168.1.100", "192.168.1.200"))?;
//!
//! let registry = Arc::new(MyRegistry::new());
//! let server = Arc::new(DhcpServer::new(config, registry, Some(Arc::new(pool))));
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! server.run(shutdown_rx).await?;
//! ```

pub mod boot;
pub mod config;
pub mod error;
pub mod packet;
pub mod pool;
pub mod server;

pub use boot::*;
pub use config::*;
pub use error::*;
pub use packet::*;
pub use pool::*;
pub use server::*;
