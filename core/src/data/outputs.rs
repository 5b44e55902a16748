//! Outputs: the symbolic values later steps consume, taken from converged
//! state.

use std::collections::BTreeMap;
use std::path::Path;

use crate::convergence::state::ConvergedState;
use crate::derive::DerivedValues;
use crate::graph::builder::HOST;
use crate::graph::node::{Attribute, NodeId};

use super::env_file::EnvFile;

pub const API_FUNCTION_ENDPOINT: &str = "API_FUNCTION_ENDPOINT";
pub const API_FUNCTION_RESOURCE_ID: &str = "API_FUNCTION_RESOURCE_ID";
pub const FUNCTION_APP_NAME: &str = "FUNCTION_APP_NAME";
pub const FUNCTION_APP_DEFAULT_DOMAIN: &str = "FUNCTION_APP_DEFAULT_DOMAIN";

/// Ordered map of output name to value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outputs {
    values: BTreeMap<String, String>,
}

impl Outputs {
    /// Build from state. The host's reported hostname wins over the derived
    /// one; the resource id is only present once the host has materialized.
    pub fn from_state(state: &ConvergedState, derived: &DerivedValues) -> Self {
        let host = NodeId::new(HOST);
        let domain = state
            .attribute(&host, Attribute::DefaultHostName)
            .unwrap_or(&derived.host_default_domain)
            .to_string();

        let mut values = BTreeMap::new();
        values.insert(API_FUNCTION_ENDPOINT.to_string(), format!("https://{}", domain));
        values.insert(FUNCTION_APP_NAME.to_string(), derived.host_name.clone());
        values.insert(FUNCTION_APP_DEFAULT_DOMAIN.to_string(), domain);
        if let Some(id) = state.attribute(&host, Attribute::ResourceId) {
            values.insert(API_FUNCTION_RESOURCE_ID.to_string(), id.to_string());
        }
        Outputs { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.values.iter()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    /// Merge into the env file at `path`.
    pub fn write_env_file(&self, path: &Path) -> std::io::Result<()> {
        EnvFile::write_merged(path, &self.values)
    }
}
