//! CephCI cluster lifecycle library
//!
//! Provisions throwaway Ceph test clusters on a cloud provider, waits for
//! them to settle, and tears every resource of a run back down.

// Core modules
pub mod config;
pub mod layout;
pub mod logging;
pub mod task_group;

// Cloud resources
pub mod provider;
pub mod provisioner;
pub mod destroyer;

// Cluster state
pub mod health;
pub mod remote;

pub use cephci_common::{Error, Result};
pub use config::HarnessConfig;
pub use destroyer::{NodeDestroyer, TeardownReport};
pub use health::{HealthChecker, HealthStatus, StatusSource};
pub use layout::{ClusterLayout, OpenStackCredentials};
pub use provider::{CloudProvider, InMemoryProvider};
pub use provisioner::{NodeDeclaration, NodeProvisioner, ProvisionParams, ProvisionedCluster, RunId};
pub use remote::{MonitorStatus, RemoteExec};
pub use task_group::TaskGroup;
