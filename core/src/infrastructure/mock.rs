//! In-memory control plane for testing.
//!
//! Behaves like the resource manager where it matters to convergence: PUT is
//! create-or-update, sites get a stable generated identity and hostname, and a
//! second role assignment for the same (principal, role, scope) under another
//! name is rejected as already existing. Faults can be injected per resource.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::ProviderError;
use crate::graph::node::ResourceKind;

use super::{ControlPlane, RemoteResource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Get(String),
    Put(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    Get,
    Put,
}

#[derive(Debug, Clone)]
struct Fault {
    op: FaultOp,
    id_contains: String,
    error: ProviderError,
    remaining: u32,
}

/// A test-double resource manager.
#[derive(Debug, Clone, Default)]
pub struct InMemoryControlPlane {
    /// Stored resources keyed by ARM id.
    pub resources: BTreeMap<String, Value>,
    /// Every call, in order.
    pub calls: Vec<Call>,
    faults: Vec<Fault>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` whose id contains `id_contains`.
    pub fn inject(&mut self, op: FaultOp, id_contains: &str, error: ProviderError, times: u32) {
        self.faults.push(Fault {
            op,
            id_contains: id_contains.to_string(),
            error,
            remaining: times,
        });
    }

    pub fn puts(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Put(id) => Some(id.as_str()),
                Call::Get(_) => None,
            })
            .collect()
    }

    pub fn put_count(&self) -> usize {
        self.puts().len()
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Resources whose id contains `fragment`.
    pub fn find(&self, fragment: &str) -> Vec<(&String, &Value)> {
        self.resources
            .iter()
            .filter(|(id, _)| id.contains(fragment))
            .collect()
    }

    fn take_fault(&mut self, op: FaultOp, id: &str) -> Option<ProviderError> {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.op == op && f.remaining > 0 && id.contains(&f.id_contains))?;
        fault.remaining -= 1;
        Some(fault.error.clone())
    }

    fn conflicting_assignment(&self, id: &str, body: &Value) -> Option<String> {
        let scope = id.split("/providers/Microsoft.Authorization/").next()?;
        let principal = body.pointer("/properties/principalId")?;
        let role = body.pointer("/properties/roleDefinitionId")?;
        self.resources
            .iter()
            .find(|(other_id, other)| {
                other_id.as_str() != id
                    && other_id.starts_with(scope)
                    && other_id.contains("/roleAssignments/")
                    && other.pointer("/properties/principalId") == Some(principal)
                    && other.pointer("/properties/roleDefinitionId") == Some(role)
            })
            .map(|(other_id, _)| other_id.clone())
    }
}

impl ControlPlane for InMemoryControlPlane {
    fn get(&mut self, _kind: ResourceKind, resource_id: &str) -> Result<Option<RemoteResource>, ProviderError> {
        self.calls.push(Call::Get(resource_id.to_string()));
        if let Some(err) = self.take_fault(FaultOp::Get, resource_id) {
            return Err(err);
        }
        Ok(self
            .resources
            .get(resource_id)
            .map(|body| RemoteResource::new(resource_id, body.clone())))
    }

    fn put(&mut self, kind: ResourceKind, resource_id: &str, body: &Value) -> Result<RemoteResource, ProviderError> {
        self.calls.push(Call::Put(resource_id.to_string()));
        if let Some(err) = self.take_fault(FaultOp::Put, resource_id) {
            return Err(err);
        }

        if kind == ResourceKind::RoleAssignment {
            if let Some(existing) = self.conflicting_assignment(resource_id, body) {
                return Err(ProviderError::AlreadyExists(format!(
                    "RoleAssignmentExists: already granted as {}",
                    existing
                )));
            }
        }

        let name = resource_id.rsplit('/').next().unwrap_or_default().to_string();
        let previous = self.resources.get(resource_id).cloned();
        let mut stored = body.clone();
        stored["id"] = json!(resource_id);
        stored["name"] = json!(name);
        if stored.get("properties").map_or(true, |p| !p.is_object()) {
            stored["properties"] = json!({});
        }
        stored["properties"]["provisioningState"] = json!("Succeeded");

        if kind == ResourceKind::ComputeHost {
            let principal = previous
                .as_ref()
                .and_then(|p| p.pointer("/identity/principalId").cloned())
                .unwrap_or_else(|| {
                    json!(Uuid::new_v5(&Uuid::NAMESPACE_URL, resource_id.as_bytes()).to_string())
                });
            stored["identity"]["principalId"] = principal;
            stored["properties"]["defaultHostName"] = json!(format!("{}.azurewebsites.net", name));
            stored["properties"]["state"] = json!("Running");
        }

        self.resources.insert(resource_id.to_string(), stored.clone());
        Ok(RemoteResource::new(resource_id, stored))
    }
}
