use crate::node::NodeStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeError {
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: NodeStatus, to: NodeStatus },

    #[error("invalid {field}: {value:?}")]
    InvalidField { field: &'static str, value: String },
}
