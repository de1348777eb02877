//! Cloud provider seam
//!
//! The lifecycle engine only talks to a provider through [`CloudProvider`].
//! Driver construction (authentication, endpoints, regions) happens outside
//! this crate; a driver maps its own error vocabulary onto
//! [`cephci_common::Error`], reporting "try again later" conditions as
//! `TransientNotReady` or as `Provider` errors with a retryable status.

pub mod memory;

pub use memory::InMemoryProvider;

use cephci_common::{ClusterNode, FloatingIp, NodeSpec, Result, Volume};

/// Operations the lifecycle engine needs from a cloud provider
#[async_trait::async_trait]
pub trait CloudProvider: Send + Sync {
    /// Create a node from a resolved spec and wait until it is reachable
    async fn create_node(&self, spec: &NodeSpec) -> Result<ClusterNode>;

    /// Every node whose name starts with `name_prefix`
    async fn list_nodes(&self, name_prefix: &str) -> Result<Vec<ClusterNode>>;

    async fn destroy_node(&self, node: &ClusterNode) -> Result<()>;

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>>;

    async fn detach_ip(&self, node: &ClusterNode, address: &str) -> Result<()>;

    async fn release_ip(&self, ip: &FloatingIp) -> Result<()>;

    async fn list_volumes(&self) -> Result<Vec<Volume>>;

    async fn destroy_volume(&self, volume: &Volume) -> Result<()>;
}
