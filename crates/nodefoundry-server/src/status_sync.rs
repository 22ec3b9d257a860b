//! Status sync
//!
//! Applies status reports from the on-host agent to the node store. Reports
//! arrive on a bounded channel and are applied one at a time by a single
//! consumer task; the last write for a node wins.
//!
//! A report whose status change the state machine rejects is not thrown
//! away entirely: the heartbeat, IP and hostname it carries are still
//! recorded, only the status stays where it was.

use crate::store::{NodeStore, Result, StoreError};
use nodefoundry_common::{is_valid_mac, normalize_mac, Node, NodeStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Status report published by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Seconds since the host booted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
}

impl StatusMessage {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ip: None,
            hostname: None,
            uptime: None,
        }
    }
}

/// One queued report
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub mac: String,
    pub message: StatusMessage,
}

/// What applying a report did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// Status (and side-channel fields) written
    Applied(NodeStatus),
    /// Transition rejected; heartbeat, IP and hostname written anyway
    Partial { from: NodeStatus, to: NodeStatus },
    /// No node with this MAC; nothing written
    UnknownNode,
    /// Status name not recognized; nothing written
    InvalidStatus(String),
}

/// Extract the MAC from a `node/<mac>/status` topic.
///
/// Returns the canonical MAC, or None for any other topic shape.
pub fn mac_from_topic(topic: &str) -> Option<String> {
    let mut parts = topic.split('/');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("node"), Some(mac), Some("status"), None) if is_valid_mac(mac) => {
            Some(normalize_mac(mac))
        }
        _ => None,
    }
}

/// Status-sync consumer
pub struct StatusSync {
    store: Arc<dyn NodeStore>,
}

impl StatusSync {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Apply one report to the store.
    ///
    /// Only storage failures are errors; every other outcome is reported
    /// through [`StatusOutcome`].
    pub async fn apply(&self, mac: &str, message: &StatusMessage) -> Result<StatusOutcome> {
        let mac = normalize_mac(mac);

        let target: NodeStatus = match message.status.parse() {
            Ok(status) => status,
            Err(_) => {
                warn!(mac = %mac, status = %message.status, "Invalid status in report");
                return Ok(StatusOutcome::InvalidStatus(message.status.clone()));
            }
        };

        let ip = message.ip.clone();
        let hostname = message.hostname.clone();
        let update = Box::new(move |node: &mut Node| {
            node.record_heartbeat(ip.as_deref(), hostname.as_deref());
            // rejected changes leave the status untouched
            let _ = node.transition_to(target);
        });

        let node = match self.store.update(&mac, update).await {
            Ok(node) => node,
            Err(StoreError::NotFound(_)) => {
                warn!(mac = %mac, "Status report from unknown node");
                return Ok(StatusOutcome::UnknownNode);
            }
            Err(e) => return Err(e),
        };

        if node.status == target {
            info!(
                mac = %mac,
                status = %target,
                uptime = ?message.uptime,
                "Node status updated"
            );
            Ok(StatusOutcome::Applied(target))
        } else {
            warn!(
                mac = %mac,
                from = %node.status,
                to = %target,
                "Invalid status transition, recorded heartbeat only"
            );
            Ok(StatusOutcome::Partial {
                from: node.status,
                to: target,
            })
        }
    }

    /// Apply a raw pub/sub message (`node/<mac>/status`, JSON payload).
    ///
    /// Malformed topics and payloads are dropped with a warning.
    pub async fn handle_topic(&self, topic: &str, payload: &[u8]) -> Option<StatusOutcome> {
        let Some(mac) = mac_from_topic(topic) else {
            warn!(topic = %topic, "Dropping status message with malformed topic");
            return None;
        };

        let message: StatusMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping undecodable status message");
                return None;
            }
        };

        match self.apply(&mac, &message).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(mac = %mac, error = %e, "Failed to apply status report");
                None
            }
        }
    }

    /// Start the consumer task.
    ///
    /// Returns the sending half of a queue holding at most `capacity`
    /// reports. The task exits when shutdown is signalled or every sender
    /// has been dropped.
    pub fn spawn(
        self: Arc<Self>,
        capacity: usize,
        mut shutdown: watch::Receiver<bool>,
    ) -> (mpsc::Sender<StatusUpdate>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<StatusUpdate>(capacity.max(1));

        let handle = tokio::spawn(async move {
            info!(capacity, "Status sync started");
            loop {
                tokio::select! {
                    update = rx.recv() => {
                        let Some(update) = update else { break };
                        if let Err(e) = self.apply(&update.mac, &update.message).await {
                            warn!(mac = %update.mac, error = %e, "Failed to apply status report");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Status sync stopped");
        });

        (tx, handle)
    }
}
