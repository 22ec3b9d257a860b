//! NodeFoundry boot script generation
//!
//! Renders what a booting machine fetches over HTTP, as a pure function
//! of its node record:
//!
//! - **discovered**: iPXE wait loop that sleeps and re-chains
//! - **installing**: iPXE script booting the Debian netboot installer,
//!   pointed at the preseed profile
//! - **installed**: iPXE script that exits to local disk
//!
//! The preseed profile ([`PreseedGenerator`]) configures networking and
//! installs the reporting agent from a late_command.
//!
//! # Example
//!
//! ```
//! use nodefoundry_common::{Node, NodeStatus};
//! use nodefoundry_ipxe::{BootScriptGenerator, IpxeConfig};
//!
//! let config = IpxeConfig::new("192.168.1.1:8080").with_poll_interval(30);
//! let generator = BootScriptGenerator::new(config).unwrap();
//!
//! let node = Node::new("00:11:22:33:44:55", NodeStatus::Discovered).unwrap();
//! let script = generator.generate(&node).unwrap();
//!
//! assert!(script.starts_with("#!ipxe"));
//! assert!(script.contains("sleep 30"));
//! ```

pub mod error;
pub mod preseed;
pub mod script;

pub use error::*;
pub use preseed::*;
pub use script::*;
