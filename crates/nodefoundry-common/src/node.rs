//! The Node type and its lifecycle state machine.
//!
//! A node is created `discovered` (first DHCP discovery or manual
//! registration), is moved to `installing` by an operator, and reaches
//! `installed` when the on-host agent reports back. The transition table
//! is the single source of truth for both paths.

use crate::error::NodeError;
use crate::mac::normalize_mac;
use crate::network::{is_valid_hostname, parse_ipv4, parse_nameservers};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Status
// ============================================================================

/// Node lifecycle status
///
/// discovered → installing → installed. No skipping, no regressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Seen on the network, waiting for an operator to start the install
    Discovered,
    /// Installer is running
    Installing,
    /// Terminal: OS installed and agent reporting
    Installed,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 3] = [
        NodeStatus::Discovered,
        NodeStatus::Installing,
        NodeStatus::Installed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Discovered => "discovered",
            NodeStatus::Installing => "installing",
            NodeStatus::Installed => "installed",
        }
    }

    /// Statuses reachable in one step from this one.
    pub fn allowed_transitions(&self) -> &'static [NodeStatus] {
        match self {
            NodeStatus::Discovered => &[NodeStatus::Installing],
            NodeStatus::Installing => &[NodeStatus::Installed],
            NodeStatus::Installed => &[],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.allowed_transitions().is_empty()
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeStatus {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NodeStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| NodeError::InvalidStatus(s.to_string()))
    }
}

/// Validate a status change against the transition table.
///
/// Requesting the current status is a successful no-op.
pub fn check_transition(from: NodeStatus, to: NodeStatus) -> Result<(), NodeError> {
    if from == to || from.allowed_transitions().contains(&to) {
        Ok(())
    } else {
        Err(NodeError::InvalidTransition { from, to })
    }
}

fn set(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// The Node
// ============================================================================

/// Provisioning record for one physical machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    /// Canonical MAC (12 lowercase hex chars), primary key
    pub mac: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Nameservers, space separated as the installer expects them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<String>,

    pub status: NodeStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Opaque passthrough payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

impl Node {
    /// Create a new node record with the MAC in canonical form.
    pub fn new(mac: &str, status: NodeStatus) -> Result<Self, NodeError> {
        let normalized = normalize_mac(mac);
        if normalized.len() != 12 {
            return Err(NodeError::InvalidMac(mac.to_string()));
        }

        let now = Utc::now();
        Ok(Self {
            mac: normalized,
            ip: None,
            hostname: None,
            netmask: None,
            gateway: None,
            dns: None,
            status,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
            extra: None,
        })
    }

    /// Create a freshly discovered node.
    pub fn discovered(mac: &str) -> Result<Self, NodeError> {
        Self::new(mac, NodeStatus::Discovered)
    }

    /// Check the MAC and every network field that is set.
    ///
    /// Empty strings count as unset.
    pub fn validate(&self) -> Result<(), NodeError> {
        if self.mac.len() != 12 || normalize_mac(&self.mac) != self.mac {
            return Err(NodeError::InvalidMac(self.mac.clone()));
        }

        for (field, value) in [
            ("ip", &self.ip),
            ("netmask", &self.netmask),
            ("gateway", &self.gateway),
        ] {
            if let Some(value) = set(value) {
                parse_ipv4(field, value)?;
            }
        }
        if let Some(dns) = set(&self.dns) {
            parse_nameservers("dns", dns)?;
        }
        if let Some(hostname) = set(&self.hostname) {
            if !is_valid_hostname(hostname) {
                return Err(NodeError::InvalidField {
                    field: "hostname",
                    value: hostname.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Parse a requested status name and check it against the table.
    pub fn can_transition_to(&self, status: &str) -> Result<NodeStatus, NodeError> {
        let target: NodeStatus = status.parse()?;
        check_transition(self.status, target)?;
        Ok(target)
    }

    /// Apply a validated transition.
    pub fn transition_to(&mut self, status: NodeStatus) -> Result<(), NodeError> {
        check_transition(self.status, status)?;
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record side-channel data reported by the agent.
    ///
    /// Empty or malformed values leave the stored fields untouched.
    pub fn record_heartbeat(&mut self, ip: Option<&str>, hostname: Option<&str>) {
        self.last_heartbeat = Some(Utc::now());
        if let Some(ip) = ip.and_then(|v| parse_ipv4("ip", v).ok()) {
            self.ip = Some(ip.to_string());
        }
        if let Some(hostname) = hostname.filter(|v| is_valid_hostname(v)) {
            self.hostname = Some(hostname.to_string());
        }
    }

    /// Hostname to hand the installer when none valid has been reported.
    pub fn hostname_or_default(&self) -> String {
        match self.hostname.as_deref() {
            Some(name) if is_valid_hostname(name) => name.to_string(),
            _ => format!("node-{}", self.mac),
        }
    }
}
