//! Error types for boot script generation

use nodefoundry_common::NodeError;
use thiserror::Error;

/// Error type for iPXE operations
#[derive(Debug, Error)]
pub enum IpxeError {
    /// Missing required configuration
    #[error("missing required configuration: {0}")]
    MissingConfig(String),

    /// Node record cannot be rendered (bad MAC)
    #[error("invalid node: {0}")]
    InvalidNode(#[from] NodeError),

    /// Network setting that is not an IPv4 address
    #[error("invalid network settings: {0}")]
    InvalidNetwork(NodeError),
}

/// Result type for iPXE operations
pub type Result<T> = std::result::Result<T, IpxeError>;
