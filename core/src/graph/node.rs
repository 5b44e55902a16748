//! Typed resource declarations.
//!
//! A `ResourceNode` is one cloud resource: a stable node id, the remote name,
//! the desired-state `ResourceSpec`, and the nodes it depends on. Specs that
//! need a runtime-generated attribute of another node (an assigned identity,
//! a resource id) list it in `references()`; the graph checks that every
//! reference is also a declared dependency.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::access::DataRole;
use crate::types::params::{ComputeTier, InstanceMemory};

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// Stable identity of a node within the graph (not the remote name).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: &str) -> Self {
        NodeId(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::new(s)
    }
}

// ---------------------------------------------------------------------------
// ResourceKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    StorageAccount,
    BlobService,
    BlobContainer,
    ServicePlan,
    ComputeHost,
    RoleAssignment,
}

impl ResourceKind {
    /// ARM resource type.
    pub fn arm_type(&self) -> &'static str {
        match self {
            ResourceKind::StorageAccount => "Microsoft.Storage/storageAccounts",
            ResourceKind::BlobService => "Microsoft.Storage/storageAccounts/blobServices",
            ResourceKind::BlobContainer => {
                "Microsoft.Storage/storageAccounts/blobServices/containers"
            }
            ResourceKind::ServicePlan => "Microsoft.Web/serverfarms",
            ResourceKind::ComputeHost => "Microsoft.Web/sites",
            ResourceKind::RoleAssignment => "Microsoft.Authorization/roleAssignments",
        }
    }

    /// Pinned API version used for every request against this kind.
    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::StorageAccount
            | ResourceKind::BlobService
            | ResourceKind::BlobContainer => "2023-05-01",
            ResourceKind::ServicePlan | ResourceKind::ComputeHost => "2024-04-01",
            ResourceKind::RoleAssignment => "2022-04-01",
        }
    }

    /// Kinds a node of this kind must directly depend on.
    pub fn prerequisites(&self) -> &'static [ResourceKind] {
        match self {
            ResourceKind::StorageAccount | ResourceKind::ServicePlan => &[],
            ResourceKind::BlobService => &[ResourceKind::StorageAccount],
            ResourceKind::BlobContainer => &[ResourceKind::BlobService],
            ResourceKind::ComputeHost => &[ResourceKind::BlobContainer, ResourceKind::ServicePlan],
            ResourceKind::RoleAssignment => {
                &[ResourceKind::ComputeHost, ResourceKind::StorageAccount]
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::StorageAccount => "storage account",
            ResourceKind::BlobService => "blob service",
            ResourceKind::BlobContainer => "blob container",
            ResourceKind::ServicePlan => "service plan",
            ResourceKind::ComputeHost => "compute host",
            ResourceKind::RoleAssignment => "role assignment",
        };
        f.pad(s)
    }
}

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// Runtime-generated attribute captured when a node materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    ResourceId,
    PrincipalId,
    DefaultHostName,
}

impl Attribute {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attribute::ResourceId => "resource_id",
            Attribute::PrincipalId => "principal_id",
            Attribute::DefaultHostName => "default_host_name",
        }
    }
}

pub type Attributes = BTreeMap<Attribute, String>;

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageAccountSpec {
    pub location: String,
    pub sku: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobServiceSpec {
    pub account: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobContainerSpec {
    pub account: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePlanSpec {
    pub location: String,
    pub tier: ComputeTier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRuntime {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeHostSpec {
    pub location: String,
    pub plan: NodeId,
    pub storage_account_name: String,
    pub deployment_container_url: String,
    pub blob_endpoint: String,
    pub queue_endpoint: String,
    pub table_endpoint: String,
    pub instance_memory: InstanceMemory,
    pub max_instance_count: u32,
    pub runtime: FunctionRuntime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleAssignmentSpec {
    pub role: DataRole,
    /// Node whose managed identity receives the grant.
    pub principal: NodeId,
    /// Node the grant is scoped to.
    pub scope: NodeId,
}

/// Desired state of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    StorageAccount(StorageAccountSpec),
    BlobService(BlobServiceSpec),
    BlobContainer(BlobContainerSpec),
    ServicePlan(ServicePlanSpec),
    ComputeHost(ComputeHostSpec),
    RoleAssignment(RoleAssignmentSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::StorageAccount(_) => ResourceKind::StorageAccount,
            ResourceSpec::BlobService(_) => ResourceKind::BlobService,
            ResourceSpec::BlobContainer(_) => ResourceKind::BlobContainer,
            ResourceSpec::ServicePlan(_) => ResourceKind::ServicePlan,
            ResourceSpec::ComputeHost(_) => ResourceKind::ComputeHost,
            ResourceSpec::RoleAssignment(_) => ResourceKind::RoleAssignment,
        }
    }

    /// Upstream attributes this spec reads at render time.
    pub fn references(&self) -> Vec<(NodeId, Attribute)> {
        match self {
            ResourceSpec::StorageAccount(_) | ResourceSpec::ServicePlan(_) => Vec::new(),
            ResourceSpec::BlobService(s) => vec![(s.account.clone(), Attribute::ResourceId)],
            ResourceSpec::BlobContainer(s) => vec![(s.account.clone(), Attribute::ResourceId)],
            ResourceSpec::ComputeHost(s) => vec![(s.plan.clone(), Attribute::ResourceId)],
            ResourceSpec::RoleAssignment(s) => vec![
                (s.principal.clone(), Attribute::PrincipalId),
                (s.scope.clone(), Attribute::ResourceId),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// ResourceNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNode {
    pub id: NodeId,
    /// Remote name. For role assignments this is the grant's purpose; the
    /// remote name is the idempotency key resolved at apply time.
    pub name: String,
    pub spec: ResourceSpec,
    pub depends_on: Vec<NodeId>,
}

impl ResourceNode {
    pub fn new(id: &str, name: &str, spec: ResourceSpec) -> Self {
        ResourceNode {
            id: NodeId::new(id),
            name: name.to_string(),
            spec,
            depends_on: Vec::new(),
        }
    }

    /// Add a dependency edge. Duplicate edges are ignored.
    pub fn depends_on(mut self, id: &NodeId) -> Self {
        if !self.depends_on.contains(id) {
            self.depends_on.push(id.clone());
        }
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }
}
