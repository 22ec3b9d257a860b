//! ReDB storage backend
//!
//! Persistent storage using the ReDB embedded database.
//!
//! ## Table Structure
//!
//! ```text
//! nodes : MAC (canonical string) -> Node (JSON)
//! ```

use super::{prepare, sort_newest_first, NodeStore, NodeUpdate, Result, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use nodefoundry_common::{normalize_mac, Node, NodeStatus};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;

const NODES: TableDefinition<&str, &str> = TableDefinition::new("nodes");

/// ReDB-backed node store.
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a ReDB database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::create(path).map_err(|e| StoreError::Database(e.to_string()))?;

        // Create the table on first open so readers never see it missing
        let write_txn = db.begin_write().map_err(|e| StoreError::Database(e.to_string()))?;
        {
            write_txn
                .open_table(NODES)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        write_txn.commit().map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn to_json(node: &Node) -> Result<String> {
        serde_json::to_string(node).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn from_json(json: &str) -> Result<Node> {
        serde_json::from_str(json).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Run a blocking closure against the database on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| StoreError::Database(format!("Task join error: {}", e)))?
    }

    /// Read, modify and write one node inside a single write transaction.
    ///
    /// `modify` returning an error aborts the transaction.
    fn modify_node<F>(db: &Database, mac: &str, modify: F) -> Result<Node>
    where
        F: FnOnce(&mut Node) -> Result<()>,
    {
        let write_txn = db.begin_write().map_err(|e| StoreError::Database(e.to_string()))?;
        let node = {
            let mut table = write_txn
                .open_table(NODES)
                .map_err(|e| StoreError::Database(e.to_string()))?;

            let json = match table.get(mac) {
                Ok(Some(access)) => access.value().to_string(),
                Ok(None) => return Err(StoreError::NotFound(mac.to_string())),
                Err(e) => return Err(StoreError::Database(e.to_string())),
            };

            let mut node = Self::from_json(&json)?;
            modify(&mut node)?;
            node.mac = mac.to_string();
            node.updated_at = Utc::now();

            table
                .insert(mac, Self::to_json(&node)?.as_str())
                .map_err(|e| StoreError::Database(e.to_string()))?;
            node
        };
        write_txn.commit().map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(node)
    }

    fn scan(db: &Database, status: Option<NodeStatus>) -> Result<Vec<Node>> {
        let read_txn = db.begin_read().map_err(|e| StoreError::Database(e.to_string()))?;
        let table = read_txn
            .open_table(NODES)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut nodes = Vec::new();
        for entry in table.iter().map_err(|e| StoreError::Database(e.to_string()))? {
            let (_, value) = entry.map_err(|e| StoreError::Database(e.to_string()))?;
            let node = Self::from_json(value.value())?;
            if status.map_or(true, |s| node.status == s) {
                nodes.push(node);
            }
        }
        sort_newest_first(&mut nodes);
        Ok(nodes)
    }
}

#[async_trait]
impl NodeStore for RedbStore {
    async fn save(&self, node: &Node) -> Result<Node> {
        let mut node = prepare(node)?;

        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(|e| StoreError::Database(e.to_string()))?;
            {
                let mut table = write_txn
                    .open_table(NODES)
                    .map_err(|e| StoreError::Database(e.to_string()))?;

                let existing = match table.get(node.mac.as_str()) {
                    Ok(Some(access)) => Some(access.value().to_string()),
                    Ok(None) => None,
                    Err(e) => return Err(StoreError::Database(e.to_string())),
                };
                if let Some(json) = existing {
                    node.created_at = Self::from_json(&json)?.created_at;
                }
                node.updated_at = Utc::now();

                table
                    .insert(node.mac.as_str(), Self::to_json(&node)?.as_str())
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
            write_txn.commit().map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(node)
        })
        .await
    }

    async fn create(&self, node: &Node) -> Result<Node> {
        let node = prepare(node)?;

        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(|e| StoreError::Database(e.to_string()))?;
            {
                let mut table = write_txn
                    .open_table(NODES)
                    .map_err(|e| StoreError::Database(e.to_string()))?;

                let exists = table
                    .get(node.mac.as_str())
                    .map_err(|e| StoreError::Database(e.to_string()))?
                    .is_some();
                if exists {
                    return Err(StoreError::AlreadyExists(node.mac.clone()));
                }

                table
                    .insert(node.mac.as_str(), Self::to_json(&node)?.as_str())
                    .map_err(|e| StoreError::Database(e.to_string()))?;
            }
            write_txn.commit().map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(node)
        })
        .await
    }

    async fn find_by_mac(&self, mac: &str) -> Result<Node> {
        let mac = normalize_mac(mac);

        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(|e| StoreError::Database(e.to_string()))?;
            let table = read_txn
                .open_table(NODES)
                .map_err(|e| StoreError::Database(e.to_string()))?;

            let access = table
                .get(mac.as_str())
                .map_err(|e| StoreError::Database(e.to_string()))?
                .ok_or_else(|| StoreError::NotFound(mac.clone()))?;
            Self::from_json(access.value())
        })
        .await
    }

    async fn list(&self) -> Result<Vec<Node>> {
        self.blocking(|db| Self::scan(db, None)).await
    }

    async fn list_by_status(&self, status: NodeStatus) -> Result<Vec<Node>> {
        self.blocking(move |db| Self::scan(db, Some(status))).await
    }

    async fn update_status(&self, mac: &str, status: NodeStatus) -> Result<Node> {
        let mac = normalize_mac(mac);

        self.blocking(move |db| {
            Self::modify_node(db, &mac, |node| Ok(node.transition_to(status)?))
        })
        .await
    }

    async fn update(&self, mac: &str, update: NodeUpdate) -> Result<Node> {
        let mac = normalize_mac(mac);

        self.blocking(move |db| {
            Self::modify_node(db, &mac, |node| {
                update(node);
                Ok(())
            })
        })
        .await
    }

    async fn delete(&self, mac: &str) -> Result<()> {
        let mac = normalize_mac(mac);

        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(|e| StoreError::Database(e.to_string()))?;
            {
                let mut table = write_txn
                    .open_table(NODES)
                    .map_err(|e| StoreError::Database(e.to_string()))?;

                let removed = table
                    .remove(mac.as_str())
                    .map_err(|e| StoreError::Database(e.to_string()))?
                    .is_some();
                if !removed {
                    return Err(StoreError::NotFound(mac.clone()));
                }
            }
            write_txn.commit().map_err(|e| StoreError::Database(e.to_string()))?;
            Ok(())
        })
        .await
    }
}
