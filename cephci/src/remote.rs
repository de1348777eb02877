//! Remote command execution seam
//!
//! The transport (SSH, serial console, ...) lives outside this crate and is
//! plugged in through [`RemoteExec`].

use crate::health::StatusSource;
use cephci_common::{Error, Result};
use tracing::{debug, warn};

/// Captured result of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs shell commands on one node
#[async_trait::async_trait]
pub trait RemoteExec: Send + Sync {
    /// Host the commands run on, for logs and errors
    fn hostname(&self) -> &str;

    async fn exec_command(&self, cmd: &str) -> Result<CommandOutput>;
}

/// Reads cluster status from a monitor node with `ceph -s`
pub struct MonitorStatus<E> {
    monitor: E,
}

impl<E: RemoteExec> MonitorStatus<E> {
    pub const STATUS_COMMAND: &'static str = "sudo ceph -s";

    pub fn new(monitor: E) -> Self {
        Self { monitor }
    }
}

#[async_trait::async_trait]
impl<E: RemoteExec> StatusSource for MonitorStatus<E> {
    async fn cluster_status(&self) -> Result<String> {
        let output = self.monitor.exec_command(Self::STATUS_COMMAND).await?;
        if !output.success() {
            return Err(Error::RemoteExec {
                host: self.monitor.hostname().to_string(),
                detail: format!(
                    "'{}' exited with {}: {}",
                    Self::STATUS_COMMAND,
                    output.exit_code,
                    output.stderr.trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

/// Touch every node so idle sessions are not dropped during long tests.
///
/// Failures are logged and otherwise ignored. Returns how many nodes answered.
pub async fn keep_alive<E: RemoteExec>(nodes: &[E]) -> usize {
    let mut answered = 0;
    for node in nodes {
        match node.exec_command("uptime").await {
            Ok(output) => {
                debug!(node = %node.hostname(), uptime = %output.stdout.trim(), "Keep-alive");
                answered += 1;
            }
            Err(e) => warn!(node = %node.hostname(), "Keep-alive failed: {}", e),
        }
    }
    answered
}
