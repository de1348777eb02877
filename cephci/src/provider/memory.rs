//! In-process provider for tests and dry runs
//!
//! Behaves like a small OpenStack tenant: created nodes get a private
//! address and one floating IP, OSD nodes get their data volumes, and
//! destroying a node orphans its floating IPs but leaves volumes behind.
//! Faults can be scripted per node name.

use super::CloudProvider;
use cephci_common::{ClusterNode, Error, FloatingIp, NodeRole, NodeSpec, Result, Volume};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// How often a scripted destroy fault fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Report not-ready for this many attempts, then succeed
    Times(u32),
    /// Never succeed
    Always,
}

/// Per-operation call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCalls {
    pub create_node: usize,
    pub list_nodes: usize,
    pub destroy_node: usize,
    pub list_floating_ips: usize,
    pub detach_ip: usize,
    pub release_ip: usize,
    pub list_volumes: usize,
    pub destroy_volume: usize,
}

impl ProviderCalls {
    pub fn total(&self) -> usize {
        self.create_node
            + self.list_nodes
            + self.destroy_node
            + self.list_floating_ips
            + self.detach_ip
            + self.release_ip
            + self.list_volumes
            + self.destroy_volume
    }

    /// Calls that change provider state
    pub fn mutations(&self) -> usize {
        self.create_node + self.destroy_node + self.detach_ip + self.release_ip + self.destroy_volume
    }
}

#[derive(Default)]
struct State {
    nodes: BTreeMap<String, ClusterNode>,
    floating_ips: BTreeMap<String, FloatingIp>,
    volumes: BTreeMap<String, Volume>,
    next_id: u32,
    destroy_faults: HashMap<String, Fault>,
    create_failures: HashSet<String>,
    calls: ProviderCalls,
}

impl State {
    fn allocate_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

/// Provider keeping all resources in memory
#[derive(Clone, Default)]
pub struct InMemoryProvider {
    state: Arc<RwLock<State>>,
    create_delay: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every creation take `delay` of (tokio) time
    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.create_delay = delay;
        self
    }

    /// Script the outcome of destroy calls for the node named `hostname`
    pub async fn fail_destroy(&self, hostname: &str, fault: Fault) {
        self.state
            .write()
            .await
            .destroy_faults
            .insert(hostname.to_string(), fault);
    }

    /// Reject creation of the node named `name`
    pub async fn fail_create(&self, name: &str) {
        self.state.write().await.create_failures.insert(name.to_string());
    }

    /// Seed a node that was created outside this provider handle
    pub async fn insert_node(&self, mut node: ClusterNode) -> ClusterNode {
        let mut state = self.state.write().await;
        if node.provider_id.is_empty() {
            node.provider_id = format!("node-{}", state.allocate_id());
        }
        for address in &node.public_ips {
            let id = format!("fip-{}", state.allocate_id());
            state.floating_ips.insert(
                id.clone(),
                FloatingIp {
                    id,
                    address: address.clone(),
                    node_id: Some(node.provider_id.clone()),
                },
            );
        }
        state.nodes.insert(node.provider_id.clone(), node.clone());
        node
    }

    /// Seed a floating IP, attached to `node_id` or orphaned
    pub async fn add_floating_ip(&self, address: &str, node_id: Option<&str>) -> FloatingIp {
        let mut state = self.state.write().await;
        let ip = FloatingIp {
            id: format!("fip-{}", state.allocate_id()),
            address: address.to_string(),
            node_id: node_id.map(str::to_string),
        };
        state.floating_ips.insert(ip.id.clone(), ip.clone());
        ip
    }

    pub async fn add_volume(&self, name: Option<&str>, size_gb: u64) -> Volume {
        let mut state = self.state.write().await;
        let volume = Volume {
            id: format!("vol-{}", state.allocate_id()),
            name: name.map(str::to_string),
            size_gb,
        };
        state.volumes.insert(volume.id.clone(), volume.clone());
        volume
    }

    pub async fn nodes(&self) -> Vec<ClusterNode> {
        self.state.read().await.nodes.values().cloned().collect()
    }

    pub async fn floating_ips(&self) -> Vec<FloatingIp> {
        self.state.read().await.floating_ips.values().cloned().collect()
    }

    pub async fn volumes(&self) -> Vec<Volume> {
        self.state.read().await.volumes.values().cloned().collect()
    }

    pub async fn calls(&self) -> ProviderCalls {
        self.state.read().await.calls
    }

    /// Highest number of creations observed running at the same time
    pub fn peak_concurrent_creates(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CloudProvider for InMemoryProvider {
    async fn create_node(&self, spec: &NodeSpec) -> Result<ClusterNode> {
        self.state.write().await.calls.create_node += 1;

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if !self.create_delay.is_zero() {
            tokio::time::sleep(self.create_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = self.state.write().await;
        if state.create_failures.contains(&spec.name) {
            return Err(Error::provider(
                "create_node",
                format!("quota exceeded while creating {}", spec.name),
            ));
        }

        let n = state.allocate_id();
        let node = ClusterNode {
            provider_id: format!("node-{}", n),
            hostname: spec.name.clone(),
            role: spec.role,
            private_ip: Some(format!("10.0.{}.{}", n / 250, n % 250 + 2)),
            public_ips: vec![format!("172.16.{}.{}", n / 250, n % 250 + 2)],
        };

        let fip_id = format!("fip-{}", state.allocate_id());
        state.floating_ips.insert(
            fip_id.clone(),
            FloatingIp {
                id: fip_id,
                address: node.public_ips[0].clone(),
                node_id: Some(node.provider_id.clone()),
            },
        );

        if let (NodeRole::Osd, Some(osd)) = (spec.role, spec.osd) {
            for disk in 0..osd.volumes {
                let id = format!("vol-{}", state.allocate_id());
                state.volumes.insert(
                    id.clone(),
                    Volume {
                        id,
                        name: Some(format!("{}-vol{}", spec.name, disk)),
                        size_gb: osd.disk_size_gb,
                    },
                );
            }
        }

        debug!(node = %node.hostname, id = %node.provider_id, "Created in-memory node");
        state.nodes.insert(node.provider_id.clone(), node.clone());
        Ok(node)
    }

    async fn list_nodes(&self, name_prefix: &str) -> Result<Vec<ClusterNode>> {
        let mut state = self.state.write().await;
        state.calls.list_nodes += 1;
        Ok(state
            .nodes
            .values()
            .filter(|n| n.hostname.starts_with(name_prefix))
            .cloned()
            .collect())
    }

    async fn destroy_node(&self, node: &ClusterNode) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.destroy_node += 1;

        match state.destroy_faults.get_mut(&node.hostname) {
            Some(Fault::Always) => {
                return Err(Error::TransientNotReady(format!(
                    "{} is still in task_state 'spawning'",
                    node.hostname
                )));
            }
            Some(Fault::Times(remaining)) if *remaining > 0 => {
                *remaining -= 1;
                return Err(Error::TransientNotReady(format!(
                    "{} is still in task_state 'spawning'",
                    node.hostname
                )));
            }
            _ => {}
        }

        if state.nodes.remove(&node.provider_id).is_none() {
            return Err(Error::NotFound(format!("node {}", node.provider_id)));
        }

        for ip in state.floating_ips.values_mut() {
            if ip.node_id.as_deref() == Some(node.provider_id.as_str()) {
                ip.node_id = None;
            }
        }
        Ok(())
    }

    async fn list_floating_ips(&self) -> Result<Vec<FloatingIp>> {
        let mut state = self.state.write().await;
        state.calls.list_floating_ips += 1;
        Ok(state.floating_ips.values().cloned().collect())
    }

    async fn detach_ip(&self, node: &ClusterNode, address: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.detach_ip += 1;

        let ip = state
            .floating_ips
            .values_mut()
            .find(|ip| ip.address == address && ip.node_id.as_deref() == Some(node.provider_id.as_str()))
            .ok_or_else(|| {
                Error::provider(
                    "detach_ip",
                    format!("{} is not attached to {}", address, node.hostname),
                )
            })?;
        ip.node_id = None;

        if let Some(live) = state.nodes.get_mut(&node.provider_id) {
            live.public_ips.retain(|a| a != address);
        }
        Ok(())
    }

    async fn release_ip(&self, ip: &FloatingIp) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.release_ip += 1;
        state
            .floating_ips
            .remove(&ip.id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("floating ip {}", ip.address)))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>> {
        let mut state = self.state.write().await;
        state.calls.list_volumes += 1;
        Ok(state.volumes.values().cloned().collect())
    }

    async fn destroy_volume(&self, volume: &Volume) -> Result<()> {
        let mut state = self.state.write().await;
        state.calls.destroy_volume += 1;
        state
            .volumes
            .remove(&volume.id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("volume {}", volume.id)))
    }
}
