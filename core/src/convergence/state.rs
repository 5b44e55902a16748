//! Converged state - the record of materialized nodes carried between runs.
//!
//! The engine reads the prior state by shared reference and produces a new
//! one; it never edits the prior record. Persisted as pretty JSON so a
//! failed run's partial state can be inspected and resumed.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::StateError;
use crate::graph::node::{Attribute, Attributes, NodeId, ResourceKind};

pub const STATE_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// MaterializedNode
// ---------------------------------------------------------------------------

/// One node whose create/update was confirmed complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaterializedNode {
    pub kind: ResourceKind,
    pub resource_id: String,
    /// SHA-256 of the rendered desired body.
    pub fingerprint: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl MaterializedNode {
    pub fn attribute(&self, attribute: Attribute) -> Option<&str> {
        self.attributes.get(&attribute).map(|s| s.as_str())
    }
}

// ---------------------------------------------------------------------------
// ConvergedState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConvergedState {
    pub version: u32,
    #[serde(default)]
    pub nodes: BTreeMap<NodeId, MaterializedNode>,
}

impl Default for ConvergedState {
    fn default() -> Self {
        ConvergedState {
            version: STATE_VERSION,
            nodes: BTreeMap::new(),
        }
    }
}

impl ConvergedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &NodeId) -> Option<&MaterializedNode> {
        self.nodes.get(id)
    }

    pub fn insert(&mut self, id: NodeId, node: MaterializedNode) {
        self.nodes.insert(id, node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn attribute(&self, id: &NodeId, attribute: Attribute) -> Option<&str> {
        self.get(id).and_then(|n| n.attribute(attribute))
    }

    pub fn count_kind(&self, kind: ResourceKind) -> usize {
        self.nodes.values().filter(|n| n.kind == kind).count()
    }

    /// Load from `path`. A missing file is an empty state (first run).
    pub fn load(path: &Path) -> Result<ConvergedState, StateError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ConvergedState::new());
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let state: ConvergedState =
            serde_json::from_str(&content).map_err(|source| StateError::Corrupt {
                path: path.to_path_buf(),
                source,
            })?;
        if state.version != STATE_VERSION {
            return Err(StateError::Version(state.version));
        }
        Ok(state)
    }

    /// Write to `path`, creating parent directories. Writes a sibling temp
    /// file first and renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), StateError> {
        let io_err = |source| StateError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| StateError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }
}

/// Fingerprint of a rendered body. `serde_json::Value` objects keep keys in
/// sorted order, so the serialization is canonical.
pub fn fingerprint(body: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}
