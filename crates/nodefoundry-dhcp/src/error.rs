//! Error types for DHCP server
//!
//! `PoolError` covers lease pool construction and bookkeeping;
//! `DhcpError` covers everything the engine can hit while handling a packet.
//! None of them stop the listen loop: a failed packet is dropped and the
//! client retries.

use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Error type for lease pool operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Start/end missing, unparseable, or start > end
    #[error("invalid IP pool bounds: {0}")]
    InvalidPoolBounds(String),

    #[error("invalid netmask: {0}")]
    InvalidNetmask(String),

    #[error("invalid gateway address: {0}")]
    InvalidGateway(String),

    #[error("invalid DNS address: {0}")]
    InvalidDns(String),

    #[error("IP pool exhausted")]
    PoolExhausted,

    #[error("IP {0} not allocated")]
    NotAllocated(Ipv4Addr),

    #[error("lease not found for {0}")]
    LeaseNotFound(String),

    #[error("lease expired for {0}")]
    LeaseExpired(String),
}

/// Error type for DHCP operations
#[derive(Debug, Error)]
pub enum DhcpError {
    /// Failed to bind to socket
    #[error("failed to bind to {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse DHCP packet
    #[error("failed to parse DHCP packet: {0}")]
    ParseError(String),

    /// Failed to encode DHCP packet
    #[error("failed to encode DHCP packet: {0}")]
    EncodeError(String),

    /// Packet carried no usable client hardware address
    #[error("empty client hardware address")]
    EmptyHardwareAddress,

    /// Lease pool refused the request
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Node record could not be created or updated
    #[error("node registry error: {0}")]
    Registry(String),

    /// Socket send error
    #[error("failed to send packet: {0}")]
    SendError(#[from] std::io::Error),
}

/// Result type for DHCP operations
pub type Result<T> = std::result::Result<T, DhcpError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    #[test]
    fn test_error_display() {
        let err = DhcpError::from(PoolError::PoolExhausted);
        assert_eq!(err.to_string(), "IP pool exhausted");

        let err = PoolError::NotAllocated(Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(err.to_string(), "IP 10.0.0.9 not allocated");

        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), 67);
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err = DhcpError::BindFailed {
            addr,
            source: io_err,
        };
        assert!(err.to_string().contains("failed to bind"));
    }

    #[test]
    fn test_pool_error_converts() {
        let err: DhcpError = PoolError::LeaseExpired("001122334455".to_string()).into();
        assert!(matches!(err, DhcpError::Pool(PoolError::LeaseExpired(_))));
    }
}
