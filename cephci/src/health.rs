//! Ceph cluster health verification
//!
//! [`evaluate`] is a pure check of one `ceph -s` report against the expected
//! OSD and monitor counts. [`HealthChecker::wait_healthy`] wraps it in a poll
//! loop that waits out transitional placement-group states first.

use cephci_common::{Error, HealthSnapshot, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

static OSD_COUNTS_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+osds:\s+(\d+)\s+up[^,]*,\s+(\d+)\s+in").unwrap()
});

static MON_QUORUM_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\s+daemons,\s+quorum").unwrap()
});

/// Placement-group states that mean the cluster is still settling
const TRANSITIONAL_STATES: [&str; 3] = ["peering", "activating", "creating"];

const HEALTH_ERROR_MARKER: &str = "HEALTH_ERR";

/// Why a parseable report is not healthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradedReason {
    OsdCountMismatch { expected: u32, actual: u32 },
    OsdNotIn { up: u32, osds_in: u32 },
    MonQuorumMismatch { expected: u32, actual: u32 },
    HealthError,
}

impl DegradedReason {
    /// Stable short code for reports and logs
    pub fn code(&self) -> &'static str {
        match self {
            Self::OsdCountMismatch { .. } => "osd-count-mismatch",
            Self::OsdNotIn { .. } => "osd-not-in",
            Self::MonQuorumMismatch { .. } => "mon-quorum-mismatch",
            Self::HealthError => "health-error",
        }
    }
}

impl std::fmt::Display for DegradedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OsdCountMismatch { expected, actual } => {
                write!(f, "{}: expected {} osds, found {}", self.code(), expected, actual)
            }
            Self::OsdNotIn { up, osds_in } => {
                write!(f, "{}: {} osds up but {} in", self.code(), up, osds_in)
            }
            Self::MonQuorumMismatch { expected, actual } => {
                write!(f, "{}: expected {} monitors in quorum, found {}", self.code(), expected, actual)
            }
            Self::HealthError => write!(f, "{}: cluster reports {}", self.code(), HEALTH_ERROR_MARKER),
        }
    }
}

/// Verdict on a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded(DegradedReason),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Anything that can produce a `ceph -s` style report
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    async fn cluster_status(&self) -> Result<String>;
}

fn capture(regex: &Regex, report: &str, what: &str) -> Result<Vec<u32>> {
    let captures = regex
        .captures(report)
        .ok_or_else(|| Error::Parse(format!("{} not found in status report", what)))?;

    captures
        .iter()
        .skip(1)
        .flatten()
        .map(|m| {
            m.as_str()
                .parse()
                .map_err(|e| Error::Parse(format!("bad {} count '{}': {}", what, m.as_str(), e)))
        })
        .collect()
}

/// OSD `(total, up, in)` counts
pub fn parse_osd_counts(report: &str) -> Result<(u32, u32, u32)> {
    match capture(&OSD_COUNTS_REGEX, report, "osd summary")?.as_slice() {
        &[total, up, osds_in] => Ok((total, up, osds_in)),
        _ => Err(Error::Parse("incomplete osd summary".to_string())),
    }
}

/// Number of monitor daemons
pub fn parse_mon_quorum(report: &str) -> Result<u32> {
    match capture(&MON_QUORUM_REGEX, report, "monitor quorum")?.as_slice() {
        &[mons] => Ok(mons),
        _ => Err(Error::Parse("incomplete monitor quorum".to_string())),
    }
}

/// Whether placement groups are still moving through transitional states
pub fn is_settling(report: &str) -> bool {
    TRANSITIONAL_STATES.iter().any(|state| report.contains(state))
}

/// Parse every field of a report; fails when either summary line is missing
pub fn snapshot(report: &str) -> Result<HealthSnapshot> {
    let (osds_total, osds_up, osds_in) = parse_osd_counts(report)?;
    Ok(HealthSnapshot {
        osds_total,
        osds_up,
        osds_in,
        mon_quorum: parse_mon_quorum(report)?,
        health_error: report.contains(HEALTH_ERROR_MARKER),
    })
}

/// Judge one report.
///
/// Checks run in a fixed order (osd count, osds in, monitor quorum, error
/// marker) and the first one that fails decides the reason. A missing
/// summary line is a parse error, never a zero count.
pub fn evaluate(report: &str, expected_osds: u32, expected_mons: u32) -> Result<HealthStatus> {
    let (total, up, osds_in) = parse_osd_counts(report)?;
    if total != expected_osds {
        return Ok(HealthStatus::Degraded(DegradedReason::OsdCountMismatch {
            expected: expected_osds,
            actual: total,
        }));
    }
    if up != osds_in {
        return Ok(HealthStatus::Degraded(DegradedReason::OsdNotIn { up, osds_in }));
    }

    let mons = parse_mon_quorum(report)?;
    if mons != expected_mons {
        return Ok(HealthStatus::Degraded(DegradedReason::MonQuorumMismatch {
            expected: expected_mons,
            actual: mons,
        }));
    }

    if report.contains(HEALTH_ERROR_MARKER) {
        return Ok(HealthStatus::Degraded(DegradedReason::HealthError));
    }

    Ok(HealthStatus::Healthy)
}

/// Polls a status source until the cluster settles, then evaluates it
#[derive(Debug, Clone, Copy)]
pub struct HealthChecker {
    poll_interval: Duration,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl HealthChecker {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Poll `source` while it reports transitional states and `timeout` has
    /// not elapsed, then evaluate the last report.
    pub async fn wait_healthy(
        &self,
        source: &dyn StatusSource,
        expected_osds: u32,
        expected_mons: u32,
        timeout: Duration,
    ) -> Result<HealthStatus> {
        let started = Instant::now();
        let mut polls = 0u32;

        let report = loop {
            let report = source.cluster_status().await?;
            polls += 1;

            if !is_settling(&report) {
                break report;
            }
            if started.elapsed() > timeout {
                warn!(polls, timeout = ?timeout, "Cluster still settling at deadline, evaluating anyway");
                break report;
            }

            debug!(polls, "Placement groups still settling");
            tokio::time::sleep(self.poll_interval).await;
        };

        let status = evaluate(&report, expected_osds, expected_mons)?;
        match &status {
            HealthStatus::Healthy => info!(polls, "Cluster is healthy"),
            HealthStatus::Degraded(reason) => warn!(polls, reason = reason.code(), "Cluster is not healthy: {}", reason),
        }

        Ok(status)
    }
}
