//! Error taxonomy for provisioning and deployment.
//!
//! Every error carries enough context to act on: the offending parameter,
//! the failing node, or the publish tool's exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::convergence::state::ConvergedState;
use crate::graph::node::{NodeId, ResourceKind};

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A caller-supplied parameter is invalid. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field} '{value}': {reason}")]
pub struct ValidationError {
    pub field: String,
    pub value: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &str, value: &str, reason: &str) -> Self {
        ValidationError {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Graph construction
// ---------------------------------------------------------------------------

/// The dependency graph contains a cycle. `path` lists the nodes on it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", join_nodes(.path))]
pub struct GraphCycleError {
    pub path: Vec<NodeId>,
}

fn join_nodes(path: &[NodeId]) -> String {
    path.iter().map(|n| n.as_str()).collect::<Vec<_>>().join(" -> ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] GraphCycleError),

    #[error("duplicate node '{0}'")]
    DuplicateNode(NodeId),

    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: NodeId, dependency: NodeId },

    #[error("node '{node}' references '{reference}' without depending on it")]
    UnboundReference { node: NodeId, reference: NodeId },

    #[error("node '{node}' ({kind}) must depend on a {required} node")]
    MissingPrerequisite {
        node: NodeId,
        kind: ResourceKind,
        required: ResourceKind,
    },
}

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

/// Failure reported by a `ControlPlane` implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Throttling, timeouts, 5xx. Safe to retry.
    #[error("transient control plane error: {0}")]
    Transient(String),

    /// The resource already exists under a different identity (e.g. a role
    /// assignment for the same principal/role/scope).
    #[error("resource already exists: {0}")]
    AlreadyExists(String),

    /// The request was rejected and retrying will not help.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The control plane answered with something we could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

/// Why a single node could not be materialized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NodeFailure {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("node '{node}' has no materialized {attribute}")]
    MissingAttribute { node: NodeId, attribute: String },
}

/// A convergence pass stopped before every node was materialized.
///
/// `partial` records the nodes that did converge; feeding it back as the prior
/// state of the next apply resumes from the failed node.
#[derive(Debug, Clone, Error)]
pub enum ConvergenceError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("node '{node}' ({kind}) failed: {cause}")]
    NodeFailed {
        node: NodeId,
        kind: ResourceKind,
        cause: NodeFailure,
        partial: Box<ConvergedState>,
    },

    #[error("cancelled before node '{next}'")]
    Cancelled {
        next: NodeId,
        partial: Box<ConvergedState>,
    },
}

impl ConvergenceError {
    /// The state converged before the failure, if the pass got that far.
    pub fn partial_state(&self) -> Option<&ConvergedState> {
        match self {
            ConvergenceError::Graph(_) => None,
            ConvergenceError::NodeFailed { partial, .. } => Some(partial),
            ConvergenceError::Cancelled { partial, .. } => Some(partial),
        }
    }

    pub fn failed_node(&self) -> Option<&NodeId> {
        match self {
            ConvergenceError::NodeFailed { node, .. } => Some(node),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Deployment
// ---------------------------------------------------------------------------

/// The publish tool could not be found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("publish tool '{tool}' not found (searched: {})", join_paths(.searched))]
pub struct ToolNotFoundError {
    pub tool: String,
    pub searched: Vec<PathBuf>,
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("host name is empty; provision the infrastructure before deploying")]
    NotProvisioned,

    #[error("missing deploy input {0}")]
    MissingInput(String),

    #[error(transparent)]
    ToolNotFound(#[from] ToolNotFoundError),

    #[error("failed to launch {}: {source}", .tool.display())]
    Launch {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("publish tool exited with status {code}")]
    Exit { code: i32 },
}

impl DeployError {
    /// Process exit code to surface for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            DeployError::Exit { code } if *code > 0 => *code,
            _ => 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings / state files
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid settings in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot serialize settings: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("unknown cloud '{0}'")]
    UnknownCloud(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("state file I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported state version {0}")]
    Version(u32),
}

// ---------------------------------------------------------------------------
// ProvisionError
// ---------------------------------------------------------------------------

/// Everything `provision::run` can fail with.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Convergence(#[from] ConvergenceError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("cannot write outputs to {}: {source}", .path.display())]
    Outputs {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
