//! Cluster layout and credential files
//!
//! A layout file looks like:
//!
//! ```yaml
//! globals:
//!   cloud-data: conf/cloud-data.yaml
//!   ceph-cluster:
//!     name: ceph
//!     create: true
//!     image-name: rhel-9.4-server-x86_64
//!     vm-size: m1.medium
//!     node1:
//!       role: mon
//!     node2:
//!       role: osd
//!       no-of-volumes: 3
//!       disk-size: 20
//! ```
//!
//! Nodes are read as `node1`, `node2`, ... up to the first missing number.

use crate::provisioner::{NodeDeclaration, ProvisionParams};
use cephci_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct LayoutFile {
    globals: LayoutGlobals,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct LayoutGlobals {
    ceph_cluster: Option<ClusterSection>,
    cloud_data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterSection {
    name: Option<String>,
    #[serde(default)]
    create: bool,
    image_name: Option<String>,
    vm_size: Option<String>,
    #[serde(flatten)]
    entries: HashMap<String, serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct NodeSection {
    role: String,
    no_of_volumes: Option<u32>,
    disk_size: Option<u64>,
    image_name: Option<String>,
    cloud_data: Option<String>,
}

/// Parsed `globals.ceph-cluster` section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLayout {
    pub name: String,
    /// Whether the run should create nodes or reuse existing ones
    pub create: bool,
    pub image_name: String,
    pub vm_size: String,
    pub cloud_data: Option<String>,
    pub nodes: Vec<NodeDeclaration>,
}

impl ClusterLayout {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: LayoutFile = serde_yaml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("cluster layout: {}", e)))?;

        let cluster = file.globals.ceph_cluster.ok_or_else(|| {
            Error::validation("globals.ceph-cluster", "section is missing")
        })?;
        let name = cluster
            .name
            .ok_or_else(|| Error::validation("ceph-cluster.name", "cluster name is required"))?;

        let mut nodes = Vec::new();
        for n in 1.. {
            let id = format!("node{}", n);
            let Some(value) = cluster.entries.get(&id) else {
                break;
            };
            let section: NodeSection = serde_yaml::from_value(value.clone())
                .map_err(|e| Error::validation(id.clone(), e.to_string()))?;

            nodes.push(NodeDeclaration {
                id,
                role: section.role,
                volumes: section.no_of_volumes,
                disk_size_gb: section.disk_size,
                image: section.image_name,
                cloud_data: section.cloud_data,
            });
        }

        debug!(cluster = %name, nodes = nodes.len(), "Loaded cluster layout");

        Ok(Self {
            name,
            create: cluster.create,
            image_name: cluster.image_name.unwrap_or_default(),
            vm_size: cluster.vm_size.unwrap_or_default(),
            cloud_data: file.globals.cloud_data,
            nodes,
        })
    }

    /// Nodes to create for this run; none when the layout reuses an
    /// existing cluster (`create: false`)
    pub fn declarations(&self) -> &[NodeDeclaration] {
        if self.create {
            &self.nodes
        } else {
            &[]
        }
    }

    /// Shared parameters for a fresh run owned by `owner`
    pub fn params(&self, owner: &str, credentials: &OpenStackCredentials) -> ProvisionParams {
        let mut params = ProvisionParams::new(&self.name, owner, &self.image_name, &self.vm_size);
        params.cloud_data = self.cloud_data.clone();
        params.keypair = credentials.keypair.clone();
        params
    }
}

/// `globals.openstack-credentials`, handed to whoever builds the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OpenStackCredentials {
    pub username: String,
    pub password: String,
    pub auth_url: String,
    pub auth_version: String,
    pub tenant_name: String,
    pub service_region: String,
    pub keypair: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    globals: CredentialsGlobals,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CredentialsGlobals {
    openstack_credentials: OpenStackCredentials,
}

impl OpenStackCredentials {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: CredentialsFile = serde_yaml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("credentials: {}", e)))?;
        Ok(file.globals.openstack_credentials)
    }
}
