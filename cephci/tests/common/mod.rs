//! Common test utilities and helpers

#![allow(dead_code)]

use cephci::health::StatusSource;
use cephci::provider::memory::Fault;
use cephci::{InMemoryProvider, NodeDeclaration, ProvisionParams, Result, RunId};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const CLUSTER: &str = "ceph";
pub const OWNER: &str = "qe";

/// `ceph -s` output from a three-monitor cluster
pub fn ceph_status(osds_total: u32, osds_up: u32, osds_in: u32, pgs: &str) -> String {
    format!(
        "  cluster:
    id:     6f0b1b44-59a1-4e0b-9d7f-5c3f8d1b2e10
    health: HEALTH_OK

  services:
    mon: 3 daemons, quorum a,b,c
    mgr: a(active)
    osd: {} osds: {} up, {} in

  data:
    pgs:     64 {}
",
        osds_total, osds_up, osds_in, pgs
    )
}

/// Provision parameters with a fixed run token
pub fn params(run: &str) -> ProvisionParams {
    ProvisionParams::new(CLUSTER, OWNER, "rhel-9.4-server-x86_64", "m1.medium")
        .with_run(RunId::existing(run))
}

/// One monitor, `osds` OSD nodes with two disks each, one client
pub fn topology(osds: usize) -> Vec<NodeDeclaration> {
    let mut nodes = vec![NodeDeclaration::new("node1", "mon")];
    for i in 0..osds {
        nodes.push(NodeDeclaration::new(format!("node{}", i + 2), "osd").with_disks(2, 10));
    }
    nodes.push(NodeDeclaration::new(format!("node{}", osds + 2), "client"));
    nodes
}

/// Provider whose creations each take a second of tokio time
pub fn slow_provider() -> InMemoryProvider {
    InMemoryProvider::new().with_create_delay(Duration::from_secs(1))
}

/// Script every node under `prefix` to keep reporting not-ready
pub async fn wedge_nodes(provider: &InMemoryProvider, prefix: &str) {
    for node in provider.nodes().await {
        if node.hostname.starts_with(prefix) {
            provider.fail_destroy(&node.hostname, Fault::Always).await;
        }
    }
}

/// Status source replaying canned reports, repeating the last one
pub struct ScriptedStatus {
    reports: Vec<String>,
    polls: AtomicUsize,
}

impl ScriptedStatus {
    pub fn new(reports: Vec<String>) -> Self {
        Self {
            reports,
            polls: AtomicUsize::new(0),
        }
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl StatusSource for ScriptedStatus {
    async fn cluster_status(&self) -> Result<String> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reports[n.min(self.reports.len() - 1)].clone())
    }
}
