//! Node storage
//!
//! Backend-agnostic persistence for node records, keyed by canonical MAC.
//! Every MAC passed in is normalized before use, so callers may hand over
//! any common notation.
//!
//! Two backends implement [`NodeStore`]:
//! - [`MemoryStore`]: in-process map, for tests and `--db-path memory`
//! - [`RedbStore`]: embedded ReDB file, JSON values

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use async_trait::async_trait;
use nodefoundry_common::{NodeError, NodeStatus};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use nodefoundry_common::Node;

/// Errors from storage operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: NodeStatus, to: NodeStatus },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("lock error: {0}")]
    Lock(String),
}

impl From<NodeError> for StoreError {
    fn from(e: NodeError) -> Self {
        match e {
            NodeError::InvalidTransition { from, to } => StoreError::InvalidTransition { from, to },
            other => StoreError::InvalidData(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// In-place edit applied to a stored node under the store's write lock.
pub type NodeUpdate = Box<dyn FnOnce(&mut Node) + Send + 'static>;

/// Storage interface for node records.
///
/// Local backends wrap blocking work in `spawn_blocking`; all methods are
/// async so callers never care which backend they hold.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Insert or replace a node.
    ///
    /// Keeps the stored `created_at` when the node already exists and
    /// stamps `updated_at`. Returns the record as persisted.
    async fn save(&self, node: &Node) -> Result<Node>;

    /// Insert a node that must not exist yet.
    async fn create(&self, node: &Node) -> Result<Node>;

    async fn find_by_mac(&self, mac: &str) -> Result<Node>;

    /// All nodes, newest first.
    async fn list(&self) -> Result<Vec<Node>>;

    /// Nodes in one status, newest first.
    async fn list_by_status(&self, status: NodeStatus) -> Result<Vec<Node>>;

    /// Move a node to a new status.
    ///
    /// The transition is checked against the state machine in the same
    /// critical section that writes it; a rejected transition leaves the
    /// record untouched.
    async fn update_status(&self, mac: &str, status: NodeStatus) -> Result<Node>;

    /// Read-modify-write a node atomically. The MAC cannot be changed.
    async fn update(&self, mac: &str, update: NodeUpdate) -> Result<Node>;

    async fn delete(&self, mac: &str) -> Result<()>;
}

/// Path value that selects the in-memory backend.
pub const MEMORY_STORE_PATH: &str = "memory";

/// Open the backend named by `path`: `memory` or a ReDB file.
pub fn open_store(path: &Path) -> Result<Arc<dyn NodeStore>> {
    if path.as_os_str() == MEMORY_STORE_PATH {
        return Ok(Arc::new(MemoryStore::new()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Database(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    Ok(Arc::new(RedbStore::open(path)?))
}

/// Newest first; MAC breaks ties so listings are stable.
pub(crate) fn sort_newest_first(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.mac.cmp(&b.mac))
    });
}

/// Bring an incoming record into storable shape.
pub(crate) fn prepare(node: &Node) -> Result<Node> {
    let mut node = node.clone();
    node.mac = nodefoundry_common::normalize_mac(&node.mac);
    node.validate()?;
    Ok(node)
}
