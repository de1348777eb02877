//! Cluster node provisioning
//!
//! Turns an ordered cluster layout into resolved [`NodeSpec`]s and creates
//! every node concurrently. Layout problems are rejected before the provider
//! is touched. A failed run is not rolled back here; tear it down through
//! [`crate::destroyer::NodeDestroyer`] using [`ProvisionParams::name_prefix`].

use crate::provider::CloudProvider;
use crate::task_group::TaskGroup;
use cephci_common::{ClusterNode, Error, NodeRole, NodeSpec, OsdAttributes, Result};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::{error, info};

const RUN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RUN_SUFFIX_LEN: usize = 8;

/// Characters allowed in every component of a node name
static NAME_COMPONENT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_.]+(-[A-Za-z0-9_.]+)*$").unwrap()
});

/// Random token shared by every node of one provisioning run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// `run` followed by 8 random lowercase alphanumerics
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..RUN_SUFFIX_LEN)
            .map(|_| RUN_ALPHABET[rng.gen_range(0..RUN_ALPHABET.len())] as char)
            .collect();
        Self(format!("run{}", suffix))
    }

    /// Reuse the token of an earlier run
    pub fn existing(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One node of a cluster layout, exactly as declared
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDeclaration {
    pub id: String,
    pub role: String,
    pub volumes: Option<u32>,
    pub disk_size_gb: Option<u64>,
    /// Overrides `ProvisionParams::image` for this node only
    pub image: Option<String>,
    /// Overrides `ProvisionParams::cloud_data` for this node only
    pub cloud_data: Option<String>,
}

impl NodeDeclaration {
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            ..Default::default()
        }
    }

    pub fn with_disks(mut self, volumes: u32, disk_size_gb: u64) -> Self {
        self.volumes = Some(volumes);
        self.disk_size_gb = Some(disk_size_gb);
        self
    }
}

/// Settings shared by every node of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionParams {
    pub cluster_name: String,
    /// Who the run belongs to; part of every node name
    pub owner: String,
    pub image: String,
    pub vm_size: String,
    pub cloud_data: Option<String>,
    pub keypair: Option<String>,
    pub root_login: bool,
    pub run: RunId,
}

impl ProvisionParams {
    /// Parameters for a fresh run with a newly generated [`RunId`]
    pub fn new(
        cluster_name: impl Into<String>,
        owner: impl Into<String>,
        image: impl Into<String>,
        vm_size: impl Into<String>,
    ) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            owner: owner.into(),
            image: image.into(),
            vm_size: vm_size.into(),
            cloud_data: None,
            keypair: None,
            root_login: true,
            run: RunId::generate(),
        }
    }

    pub fn with_run(mut self, run: RunId) -> Self {
        self.run = run;
        self
    }

    /// Prefix matching every node and volume of this run and nothing else
    pub fn name_prefix(&self) -> String {
        format!("{}-{}-{}-", self.cluster_name, self.owner, self.run)
    }

    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("cluster-name", &self.cluster_name),
            ("owner", &self.owner),
            ("run", &self.run.0),
        ] {
            if !NAME_COMPONENT_REGEX.is_match(value) {
                return Err(Error::validation(
                    field,
                    format!("'{}' cannot be used in a node name", value),
                ));
            }
        }

        if self.vm_size.trim().is_empty() {
            return Err(Error::validation("vm-size", "VM size cannot be empty"));
        }

        Ok(())
    }
}

/// Prefix matching every run `owner` has made of `cluster_name`
pub fn owner_prefix(cluster_name: &str, owner: &str) -> String {
    format!("{}-{}-", cluster_name, owner)
}

/// Resolve and validate every declaration; never touches the provider.
///
/// Errors name the offending field as `<node-id>.<field>`.
pub fn plan(topology: &[NodeDeclaration], params: &ProvisionParams) -> Result<Vec<NodeSpec>> {
    params.validate()?;

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(topology.len());

    for (position, decl) in topology.iter().enumerate() {
        if !NAME_COMPONENT_REGEX.is_match(&decl.id) {
            return Err(Error::validation(
                format!("nodes[{}].id", position),
                format!("invalid node id '{}'", decl.id),
            ));
        }
        if !seen.insert(decl.id.as_str()) {
            return Err(Error::validation(
                format!("{}.id", decl.id),
                "node declared more than once",
            ));
        }

        let role = NodeRole::parse(&decl.role).ok_or_else(|| {
            Error::validation(format!("{}.role", decl.id), format!("unknown role '{}'", decl.role))
        })?;

        let osd = match role {
            NodeRole::Osd => Some(osd_attributes(decl)?),
            _ => None,
        };

        let image = decl.image.as_ref().unwrap_or(&params.image);
        if image.trim().is_empty() {
            return Err(Error::validation(
                format!("{}.image-name", decl.id),
                "no image given for node and no cluster default",
            ));
        }

        specs.push(NodeSpec {
            id: decl.id.clone(),
            index: position as u32 + 1,
            name: format!("{}{}-{}", params.name_prefix(), decl.id, role),
            role,
            image: image.clone(),
            vm_size: params.vm_size.clone(),
            cloud_data: decl.cloud_data.clone().or_else(|| params.cloud_data.clone()),
            keypair: params.keypair.clone(),
            root_login: params.root_login,
            osd,
        });
    }

    Ok(specs)
}

fn osd_attributes(decl: &NodeDeclaration) -> Result<OsdAttributes> {
    let volumes = decl.volumes.ok_or_else(|| {
        Error::validation(format!("{}.no-of-volumes", decl.id), "required for osd nodes")
    })?;
    let disk_size_gb = decl.disk_size_gb.ok_or_else(|| {
        Error::validation(format!("{}.disk-size", decl.id), "required for osd nodes")
    })?;

    if volumes == 0 {
        return Err(Error::validation(
            format!("{}.no-of-volumes", decl.id),
            "osd nodes need at least one volume",
        ));
    }
    if disk_size_gb == 0 {
        return Err(Error::validation(
            format!("{}.disk-size", decl.id),
            "disk size must be positive",
        ));
    }

    Ok(OsdAttributes {
        volumes,
        disk_size_gb,
    })
}

/// Nodes created by one successful run
#[derive(Debug, Clone)]
pub struct ProvisionedCluster {
    pub run: RunId,
    pub name_prefix: String,
    /// Keyed by declared node id
    pub nodes: HashMap<String, ClusterNode>,
}

impl ProvisionedCluster {
    pub fn nodes_with_role(&self, role: NodeRole) -> Vec<&ClusterNode> {
        let mut nodes: Vec<_> = self.nodes.values().filter(|n| n.role == role).collect();
        nodes.sort_by(|a, b| a.hostname.cmp(&b.hostname));
        nodes
    }
}

/// Creates cluster nodes through a provider
pub struct NodeProvisioner {
    provider: Arc<dyn CloudProvider>,
}

impl NodeProvisioner {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self { provider }
    }

    /// Create every declared node concurrently.
    ///
    /// Returns only after every creation has settled. Any failed creation
    /// fails the whole run; nodes that did get created stay up.
    pub async fn provision(
        &self,
        topology: &[NodeDeclaration],
        params: &ProvisionParams,
    ) -> Result<ProvisionedCluster> {
        let specs = plan(topology, params)?;
        let name_prefix = params.name_prefix();

        info!(
            run = %params.run,
            prefix = %name_prefix,
            nodes = specs.len(),
            "Provisioning cluster"
        );

        let mut group = TaskGroup::new();
        for spec in specs {
            let provider = self.provider.clone();
            group.spawn(spec.name.clone(), async move {
                info!(node = %spec.name, role = %spec.role, image = %spec.image, "Creating node");
                let node = provider.create_node(&spec).await?;
                info!(node = %node.hostname, ip = ?node.private_ip, "Node created");
                Ok((spec.id, node))
            });
        }

        let nodes = group.join_map().await.map_err(|e| {
            error!(prefix = %name_prefix, "Provisioning failed, created nodes are left for teardown: {}", e);
            e
        })?;

        info!(run = %params.run, nodes = nodes.len(), "Done creating nodes");

        Ok(ProvisionedCluster {
            run: params.run.clone(),
            name_prefix,
            nodes,
        })
    }
}
