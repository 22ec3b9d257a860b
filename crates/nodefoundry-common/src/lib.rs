pub mod error;
pub mod mac;
pub mod network;
pub mod node;

pub use error::NodeError;
pub use mac::{format_mac, is_valid_mac, mac_from_bytes, normalize_mac};
pub use network::{is_valid_hostname, join_host_port, parse_ipv4, parse_nameservers, strip_port};
pub use node::*;

pub type Result<T> = std::result::Result<T, NodeError>;
