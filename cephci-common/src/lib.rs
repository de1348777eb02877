//! Common types shared by the cephci lifecycle engine and the collaborators
//! that plug into it (provider drivers, remote transports, config loaders).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Role a node plays in a Ceph test cluster
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Mon,       // monitor
    Osd,       // object storage daemon
    Mgr,       // manager
    Mds,       // metadata server
    Rgw,       // rados gateway
    Client,    // tool host
    Installer, // ceph-ansible / cephadm driver host
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mon => "mon",
            Self::Osd => "osd",
            Self::Mgr => "mgr",
            Self::Mds => "mds",
            Self::Rgw => "rgw",
            Self::Client => "client",
            Self::Installer => "installer",
        }
    }

    /// Parse a role name as written in cluster layouts
    pub fn parse(role: &str) -> Option<Self> {
        match role.trim() {
            "mon" => Some(Self::Mon),
            "osd" => Some(Self::Osd),
            "mgr" => Some(Self::Mgr),
            "mds" => Some(Self::Mds),
            "rgw" => Some(Self::Rgw),
            "client" => Some(Self::Client),
            "installer" => Some(Self::Installer),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Block devices attached to an OSD node
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OsdAttributes {
    pub volumes: u32,
    pub disk_size_gb: u64,
}

/// Fully resolved description of one node to create
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    /// Identifier from the layout ("node1", "node2", ...)
    pub id: String,
    pub index: u32,
    /// Unique provider name: `<cluster>-<owner>-<run>-<id>-<role>`
    pub name: String,
    pub role: NodeRole,
    pub image: String,
    pub vm_size: String,
    pub cloud_data: Option<String>,
    pub keypair: Option<String>,
    pub root_login: bool,
    /// Present exactly when `role` is `Osd`
    pub osd: Option<OsdAttributes>,
}

/// Live node handle returned by a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterNode {
    pub provider_id: String,
    /// Provider resource name, also the guest hostname
    pub hostname: String,
    pub role: NodeRole,
    pub private_ip: Option<String>,
    pub public_ips: Vec<String>,
}

/// Provider level address, possibly orphaned
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: String,
    pub address: String,
    /// Provider id of the node holding this address
    pub node_id: Option<String>,
}

impl FloatingIp {
    pub fn is_orphaned(&self) -> bool {
        self.node_id.is_none()
    }
}

/// Provider level block storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub id: String,
    pub name: Option<String>,
    pub size_gb: u64,
}

/// One parsed `ceph -s` report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub osds_total: u32,
    pub osds_up: u32,
    pub osds_in: u32,
    pub mon_quorum: u32,
    pub health_error: bool,
}

/// Lifecycle engine errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not ready: {0}")]
    TransientNotReady(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Failed to destroy {resource} with {timeout:?} timeout (elapsed {elapsed:?}): {detail}")]
    TimeoutExceeded {
        resource: String,
        timeout: Duration,
        elapsed: Duration,
        detail: String,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider error during {operation}: {detail}")]
    Provider {
        operation: String,
        status: Option<u16>,
        detail: String,
    },

    #[error("Remote command failed on {host}: {detail}")]
    RemoteExec { host: String, detail: String },

    #[error("Task {label} did not complete: {detail}")]
    TaskFailed { label: String, detail: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} operations failed: {}", .0.len(), summarize(.0))]
    Multiple(Vec<Error>),
}

fn summarize(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn provider(operation: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.into(),
            status: None,
            detail: detail.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    ///
    /// Besides explicit not-ready signals, provider responses carrying
    /// 409 (resource busy), 429 (throttled) or 503 (unavailable) count as
    /// transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientNotReady(_) => true,
            Self::Provider {
                status: Some(status),
                ..
            } => matches!(status, 409 | 429 | 503),
            _ => false,
        }
    }

    /// Whether the resource no longer exists, e.g. because a concurrent
    /// teardown already removed it. Provider responses with status 404 count.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::Provider {
                    status: Some(404),
                    ..
                }
        )
    }

    /// Fold gathered failures into one result: none is success, a single
    /// failure is returned unchanged, several become `Multiple`.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple(errors)),
        }
    }

    /// Names of every resource that exhausted its retry budget, including
    /// those nested in `Multiple`
    pub fn timed_out_resources(&self) -> Vec<&str> {
        match self {
            Self::TimeoutExceeded { resource, .. } => vec![resource.as_str()],
            Self::Multiple(errors) => errors
                .iter()
                .flat_map(|e| e.timed_out_resources())
                .collect(),
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
