//! Cluster teardown
//!
//! Tears down everything whose name starts with a prefix, in dependency
//! order:
//!
//! 1. every matching node, concurrently: detach its public IPs, then destroy
//!    it, retrying while the provider says it is not ready yet
//! 2. once all node tasks have settled, every orphaned floating IP
//! 3. then every volume whose name starts with the prefix
//!
//! Failures from all three phases are gathered and reported together, so a
//! teardown that times out on several nodes names all of them.

use crate::provider::CloudProvider;
use crate::task_group::TaskGroup;
use cephci_common::{ClusterNode, Error, Result, Volume};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Where a node is in its teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TeardownState {
    Running,
    DetachingIps,
    Destroying,
    Destroyed,
    TimedOut,
    /// Provider refused with a non-transient error
    Failed,
}

/// Destroyer timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestroyerConfig {
    /// Wait between attempts after a transient failure
    pub retry_interval: Duration,
    /// Wait before deleting each volume so detachment can finish
    pub volume_settle: Duration,
}

impl Default for DestroyerConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(1),
            volume_settle: Duration::from_secs(10),
        }
    }
}

/// What a successful teardown removed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownReport {
    pub prefix: String,
    pub destroyed_nodes: Vec<String>,
    pub released_ips: Vec<String>,
    pub destroyed_volumes: Vec<String>,
    /// Volumes ignored because they have no name
    pub skipped_volumes: usize,
    pub started: DateTime<Utc>,
    pub completed: DateTime<Utc>,
}

impl TeardownReport {
    /// Nothing was removed
    pub fn is_noop(&self) -> bool {
        self.destroyed_nodes.is_empty()
            && self.released_ips.is_empty()
            && self.destroyed_volumes.is_empty()
    }
}

/// Tears down nodes, floating IPs and volumes by name prefix
pub struct NodeDestroyer {
    provider: Arc<dyn CloudProvider>,
    config: DestroyerConfig,
}

impl NodeDestroyer {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self::with_config(provider, DestroyerConfig::default())
    }

    pub fn with_config(provider: Arc<dyn CloudProvider>, config: DestroyerConfig) -> Self {
        Self { provider, config }
    }

    /// Remove every resource named with `prefix`.
    ///
    /// `timeout` bounds how long a single node (or volume) may keep
    /// reporting not-ready before it is abandoned. Safe to call repeatedly
    /// and on half-provisioned runs.
    pub async fn teardown(&self, prefix: &str, timeout: Duration) -> Result<TeardownReport> {
        if prefix.trim().is_empty() {
            return Err(Error::validation(
                "prefix",
                "refusing to tear down with an empty name prefix",
            ));
        }

        let started = Utc::now();
        let mut failures = Vec::new();

        let destroyed_nodes = match self.destroy_nodes(prefix, timeout).await {
            Ok((destroyed, errors)) => {
                failures.extend(errors);
                destroyed
            }
            Err(e) => {
                failures.push(e);
                Vec::new()
            }
        };

        let released_ips = match self.release_orphaned_ips().await {
            Ok((released, errors)) => {
                failures.extend(errors);
                released
            }
            Err(e) => {
                failures.push(e);
                Vec::new()
            }
        };

        let (destroyed_volumes, skipped_volumes) = match self.destroy_volumes(prefix, timeout).await {
            Ok((destroyed, skipped, errors)) => {
                failures.extend(errors);
                (destroyed, skipped)
            }
            Err(e) => {
                failures.push(e);
                (Vec::new(), 0)
            }
        };

        if let Err(e) = Error::aggregate(failures) {
            let timed_out = e.timed_out_resources();
            error!(
                prefix = %prefix,
                timed_out = ?timed_out,
                "Teardown incomplete: {}",
                e
            );
            return Err(e);
        }

        let report = TeardownReport {
            prefix: prefix.to_string(),
            destroyed_nodes,
            released_ips,
            destroyed_volumes,
            skipped_volumes,
            started,
            completed: Utc::now(),
        };

        info!(
            prefix = %prefix,
            nodes = report.destroyed_nodes.len(),
            ips = report.released_ips.len(),
            volumes = report.destroyed_volumes.len(),
            "Teardown complete"
        );

        Ok(report)
    }

    async fn destroy_nodes(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<(Vec<String>, Vec<Error>)> {
        let nodes: Vec<ClusterNode> = self
            .provider
            .list_nodes(prefix)
            .await?
            .into_iter()
            .filter(|n| n.hostname.starts_with(prefix))
            .collect();

        if nodes.is_empty() {
            info!(prefix = %prefix, "No nodes to destroy");
        }

        let mut group = TaskGroup::new();
        for node in nodes {
            let provider = self.provider.clone();
            let retry_interval = self.config.retry_interval;
            group.spawn(node.hostname.clone(), async move {
                teardown_node(provider, node, timeout, retry_interval).await
            });
        }

        Ok(partition(group.join().await))
    }

    async fn release_orphaned_ips(&self) -> Result<(Vec<String>, Vec<Error>)> {
        let orphaned: Vec<_> = self
            .provider
            .list_floating_ips()
            .await?
            .into_iter()
            .filter(|ip| ip.is_orphaned())
            .collect();

        let mut group = TaskGroup::new();
        for ip in orphaned {
            let provider = self.provider.clone();
            group.spawn(ip.address.clone(), async move {
                info!(ip = %ip.address, "Releasing ip");
                let released = provider.release_ip(&ip).await;
                match released {
                    Ok(()) => Ok(Some(ip.address)),
                    Err(e) if e.is_not_found() => {
                        debug!(ip = %ip.address, "Ip already released: {}", e);
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            });
        }

        Ok(partition(group.join().await))
    }

    async fn destroy_volumes(
        &self,
        prefix: &str,
        timeout: Duration,
    ) -> Result<(Vec<String>, usize, Vec<Error>)> {
        let mut skipped = 0;
        let mut group = TaskGroup::new();

        for volume in self.provider.list_volumes().await? {
            let name = match &volume.name {
                Some(name) => name.clone(),
                None => {
                    info!(volume = %volume.id, "Volume has no name, skipping");
                    skipped += 1;
                    continue;
                }
            };
            if !name.starts_with(prefix) {
                continue;
            }

            let provider = self.provider.clone();
            let config = self.config;
            group.spawn(name.clone(), async move {
                destroy_volume(provider, volume, name, timeout, config).await
            });
        }

        let (destroyed, errors) = partition(group.join().await);
        Ok((destroyed, skipped, errors))
    }
}

/// Split outcomes into what this teardown removed and what failed.
/// `Ok(None)` is a resource somebody else removed first.
fn partition(outcomes: Vec<Result<Option<String>>>) -> (Vec<String>, Vec<Error>) {
    let mut done = Vec::new();
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(Some(name)) => done.push(name),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    (done, errors)
}

fn transition(node: &ClusterNode, state: TeardownState) {
    debug!(node = %node.hostname, state = ?state, "Teardown state change");
}

async fn teardown_node(
    provider: Arc<dyn CloudProvider>,
    node: ClusterNode,
    timeout: Duration,
    retry_interval: Duration,
) -> Result<Option<String>> {
    let provider = provider.as_ref();
    transition(&node, TeardownState::Running);

    transition(&node, TeardownState::DetachingIps);
    for address in &node.public_ips {
        info!(node = %node.hostname, ip = %address, "Removing ip from node");
        if let Err(e) = provider.detach_ip(&node, address).await {
            warn!(node = %node.hostname, ip = %address, "Failed to detach ip: {}", e);
        }
    }

    transition(&node, TeardownState::Destroying);
    info!(node = %node.hostname, timeout = ?timeout, "Destroying node");

    let target = &node;
    let outcome = retry_while_transient(&node.hostname, timeout, retry_interval, move || {
        provider.destroy_node(target)
    })
    .await;

    match outcome {
        Ok(attempts) => {
            transition(&node, TeardownState::Destroyed);
            info!(node = %node.hostname, attempts, "Node destroyed");
            Ok(Some(node.hostname))
        }
        Err(e) if e.is_not_found() => {
            transition(&node, TeardownState::Destroyed);
            info!(node = %node.hostname, "Node already gone: {}", e);
            Ok(None)
        }
        Err(e) => {
            let state = match e {
                Error::TimeoutExceeded { .. } => TeardownState::TimedOut,
                _ => TeardownState::Failed,
            };
            transition(&node, state);
            Err(e)
        }
    }
}

async fn destroy_volume(
    provider: Arc<dyn CloudProvider>,
    volume: Volume,
    name: String,
    timeout: Duration,
    config: DestroyerConfig,
) -> Result<Option<String>> {
    let provider = provider.as_ref();
    info!(volume = %name, "Removing volume");

    if !config.volume_settle.is_zero() {
        tokio::time::sleep(config.volume_settle).await;
    }

    let target = &volume;
    let outcome = retry_while_transient(&name, timeout, config.retry_interval, move || {
        provider.destroy_volume(target)
    })
    .await;

    match outcome {
        Ok(_) => Ok(Some(name)),
        Err(e) if e.is_not_found() => {
            debug!(volume = %name, "Volume already removed: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Call `attempt` until it succeeds, fails for good, or keeps failing
/// transiently for longer than `timeout`. Returns the number of attempts.
async fn retry_while_transient<F, Fut>(
    resource: &str,
    timeout: Duration,
    interval: Duration,
    mut attempt: F,
) -> Result<u32>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match attempt().await {
            Ok(()) => return Ok(attempts),
            Err(e) if e.is_transient() => {
                let elapsed = started.elapsed();
                if elapsed > timeout {
                    return Err(Error::TimeoutExceeded {
                        resource: resource.to_string(),
                        timeout,
                        elapsed,
                        detail: format!("gave up after {} attempts, last error: {}", attempts, e),
                    });
                }
                debug!(resource = %resource, attempts, "Not ready yet: {}", e);
                tokio::time::sleep(interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}
