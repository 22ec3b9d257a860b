//! In-memory storage backend
//!
//! Nothing survives a restart. Used by tests and when the database path is
//! `memory`.

use super::{prepare, sort_newest_first, NodeStore, NodeUpdate, Result, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use nodefoundry_common::{normalize_mac, Node, NodeStatus};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory node store keyed by canonical MAC.
#[derive(Default)]
pub struct MemoryStore {
    nodes: RwLock<HashMap<String, Node>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Node>>> {
        self.nodes
            .read()
            .map_err(|e| StoreError::Lock(format!("read lock poisoned: {}", e)))
    }

    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Node>>> {
        self.nodes
            .write()
            .map_err(|e| StoreError::Lock(format!("write lock poisoned: {}", e)))
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn save(&self, node: &Node) -> Result<Node> {
        let mut node = prepare(node)?;
        let mut nodes = self.write_lock()?;

        if let Some(existing) = nodes.get(&node.mac) {
            node.created_at = existing.created_at;
        }
        node.updated_at = Utc::now();
        nodes.insert(node.mac.clone(), node.clone());
        Ok(node)
    }

    async fn create(&self, node: &Node) -> Result<Node> {
        let node = prepare(node)?;
        let mut nodes = self.write_lock()?;

        if nodes.contains_key(&node.mac) {
            return Err(StoreError::AlreadyExists(node.mac));
        }
        nodes.insert(node.mac.clone(), node.clone());
        Ok(node)
    }

    async fn find_by_mac(&self, mac: &str) -> Result<Node> {
        let mac = normalize_mac(mac);
        self.read_lock()?
            .get(&mac)
            .cloned()
            .ok_or(StoreError::NotFound(mac))
    }

    async fn list(&self) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self.read_lock()?.values().cloned().collect();
        sort_newest_first(&mut nodes);
        Ok(nodes)
    }

    async fn list_by_status(&self, status: NodeStatus) -> Result<Vec<Node>> {
        let mut nodes: Vec<Node> = self
            .read_lock()?
            .values()
            .filter(|n| n.status == status)
            .cloned()
            .collect();
        sort_newest_first(&mut nodes);
        Ok(nodes)
    }

    async fn update_status(&self, mac: &str, status: NodeStatus) -> Result<Node> {
        let mac = normalize_mac(mac);
        let mut nodes = self.write_lock()?;

        let node = nodes.get_mut(&mac).ok_or(StoreError::NotFound(mac))?;
        node.transition_to(status)?;
        Ok(node.clone())
    }

    async fn update(&self, mac: &str, update: NodeUpdate) -> Result<Node> {
        let mac = normalize_mac(mac);
        let mut nodes = self.write_lock()?;

        let node = nodes.get_mut(&mac).ok_or_else(|| StoreError::NotFound(mac.clone()))?;
        update(node);
        node.mac = mac;
        node.updated_at = Utc::now();
        Ok(node.clone())
    }

    async fn delete(&self, mac: &str) -> Result<()> {
        let mac = normalize_mac(mac);
        match self.write_lock()?.remove(&mac) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(mac)),
        }
    }
}
