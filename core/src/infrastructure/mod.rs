//! Control plane backends.
//!
//! `ControlPlane` is the seam between the convergence engine and the cloud.
//! `arm::ArmBackend` drives the real resource manager through the `az` CLI;
//! `mock::InMemoryControlPlane` is the test double.

pub mod arm;
pub mod mock;
pub mod runner;

use serde_json::Value;

use crate::errors::ProviderError;
use crate::graph::node::ResourceKind;

/// A resource as the control plane reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResource {
    pub id: String,
    pub body: Value,
}

impl RemoteResource {
    pub fn new(id: &str, body: Value) -> Self {
        RemoteResource {
            id: id.to_string(),
            body,
        }
    }

    pub fn provisioning_state(&self) -> Option<&str> {
        self.body
            .pointer("/properties/provisioningState")
            .and_then(Value::as_str)
    }

    pub fn principal_id(&self) -> Option<&str> {
        self.body
            .pointer("/identity/principalId")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn default_host_name(&self) -> Option<&str> {
        self.body
            .pointer("/properties/defaultHostName")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Get-by-id and create-or-update against the resource manager.
pub trait ControlPlane {
    /// Current state of a resource, or `None` if it does not exist.
    fn get(&mut self, kind: ResourceKind, resource_id: &str) -> Result<Option<RemoteResource>, ProviderError>;

    /// Create or update a resource. Returns once the resource is complete,
    /// including any generated attributes.
    fn put(&mut self, kind: ResourceKind, resource_id: &str, body: &Value) -> Result<RemoteResource, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::mock::InMemoryControlPlane;
    use super::*;
    use serde_json::json;

    #[test]
    fn mock_implements_control_plane() {
        let plane = InMemoryControlPlane::new();
        let _: &dyn ControlPlane = &plane;
    }

    #[test]
    fn remote_attribute_accessors() {
        let r = RemoteResource::new(
            "/sites/x",
            json!({
                "identity": { "principalId": "p-1" },
                "properties": { "defaultHostName": "x.azurewebsites.net", "provisioningState": "Succeeded" }
            }),
        );
        assert_eq!(r.principal_id(), Some("p-1"));
        assert_eq!(r.default_host_name(), Some("x.azurewebsites.net"));
        assert_eq!(r.provisioning_state(), Some("Succeeded"));
        let empty = RemoteResource::new("/x", json!({ "identity": { "principalId": "" } }));
        assert_eq!(empty.principal_id(), None);
    }
}
