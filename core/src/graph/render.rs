//! Render a node's desired state into an ARM request body.
//!
//! Rendering happens during convergence, once every upstream node has
//! materialized, because some fields (the plan id, the host identity) only
//! exist after creation. Security-relevant properties are fixed here: TLS 1.2
//! minimum, HTTPS only, FTPS only, no shared keys, no public blob access.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::access::{resolve_grant, AccessGrant, HostIdentity};
use crate::errors::NodeFailure;
use crate::types::params::Target;

use super::node::*;

/// Attributes materialized so far in the current pass, keyed by node.
pub struct RenderContext<'a> {
    pub target: &'a Target,
    pub materialized: &'a BTreeMap<NodeId, Attributes>,
}

impl<'a> RenderContext<'a> {
    pub fn attr(&self, node: &NodeId, attribute: Attribute) -> Result<&'a str, NodeFailure> {
        self.materialized
            .get(node)
            .and_then(|attrs| attrs.get(&attribute))
            .map(|s| s.as_str())
            .ok_or_else(|| NodeFailure::MissingAttribute {
                node: node.clone(),
                attribute: attribute.as_str().to_string(),
            })
    }
}

/// A node ready to send to the control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedResource {
    pub resource_id: String,
    pub body: Value,
    /// Set for role assignments: the grant the resolver produced.
    pub grant: Option<AccessGrant>,
}

pub fn render(node: &ResourceNode, ctx: &RenderContext<'_>) -> Result<RenderedResource, NodeFailure> {
    let rg = ctx.target.resource_group_id();
    match &node.spec {
        ResourceSpec::StorageAccount(s) => Ok(RenderedResource {
            resource_id: format!("{}/providers/{}/{}", rg, node.kind().arm_type(), node.name),
            body: json!({
                "location": s.location,
                "kind": "StorageV2",
                "sku": { "name": s.sku },
                "properties": {
                    "minimumTlsVersion": "TLS1_2",
                    "supportsHttpsTrafficOnly": true,
                    "allowBlobPublicAccess": false,
                    "allowSharedKeyAccess": false,
                    "defaultToOAuthAuthentication": true,
                    "publicNetworkAccess": "Enabled"
                }
            }),
            grant: None,
        }),

        ResourceSpec::BlobService(s) => {
            let account = ctx.attr(&s.account, Attribute::ResourceId)?;
            Ok(RenderedResource {
                resource_id: format!("{}/blobServices/{}", account, node.name),
                body: json!({ "properties": {} }),
                grant: None,
            })
        }

        ResourceSpec::BlobContainer(s) => {
            let account = ctx.attr(&s.account, Attribute::ResourceId)?;
            Ok(RenderedResource {
                resource_id: format!("{}/blobServices/default/containers/{}", account, node.name),
                body: json!({ "properties": { "publicAccess": "None" } }),
                grant: None,
            })
        }

        ResourceSpec::ServicePlan(s) => Ok(RenderedResource {
            resource_id: format!("{}/providers/{}/{}", rg, node.kind().arm_type(), node.name),
            body: json!({
                "location": s.location,
                "kind": "functionapp",
                "sku": { "name": s.tier.sku_name(), "tier": s.tier.sku_tier() },
                "properties": { "reserved": true }
            }),
            grant: None,
        }),

        ResourceSpec::ComputeHost(h) => {
            let plan_id = ctx.attr(&h.plan, Attribute::ResourceId)?;
            Ok(RenderedResource {
                resource_id: format!("{}/providers/{}/{}", rg, node.kind().arm_type(), node.name),
                body: host_body(h, plan_id),
                grant: None,
            })
        }

        ResourceSpec::RoleAssignment(r) => {
            let principal_id = ctx.attr(&r.principal, Attribute::PrincipalId)?;
            let scope = ctx.attr(&r.scope, Attribute::ResourceId)?;
            let identity = HostIdentity {
                principal_id: principal_id.to_string(),
            };
            let grant = resolve_grant(&identity, scope, r.role);
            Ok(RenderedResource {
                resource_id: grant.assignment_id(),
                body: json!({
                    "properties": {
                        "roleDefinitionId": r.role.definition_id(&ctx.target.subscription_id),
                        "principalId": grant.principal_id,
                        "principalType": "ServicePrincipal"
                    }
                }),
                grant: Some(grant),
            })
        }
    }
}

fn host_body(h: &ComputeHostSpec, plan_id: &str) -> Value {
    json!({
        "location": h.location,
        "kind": "functionapp,linux",
        "identity": { "type": "SystemAssigned" },
        "properties": {
            "serverFarmId": plan_id,
            "httpsOnly": true,
            "siteConfig": {
                "minTlsVersion": "1.2",
                "ftpsState": "FtpsOnly",
                "appSettings": [
                    { "name": "AzureWebJobsStorage__accountName", "value": h.storage_account_name },
                    { "name": "AzureWebJobsStorage__blobServiceUri", "value": h.blob_endpoint },
                    { "name": "AzureWebJobsStorage__queueServiceUri", "value": h.queue_endpoint },
                    { "name": "AzureWebJobsStorage__tableServiceUri", "value": h.table_endpoint }
                ]
            },
            "functionAppConfig": {
                "deployment": {
                    "storage": {
                        "type": "blobContainer",
                        "value": h.deployment_container_url,
                        "authentication": { "type": "SystemAssignedIdentity" }
                    }
                },
                "scaleAndConcurrency": {
                    "maximumInstanceCount": h.max_instance_count,
                    "instanceMemoryMB": h.instance_memory.megabytes()
                },
                "runtime": { "name": h.runtime.name, "version": h.runtime.version }
            }
        }
    })
}

/// True when every field of `desired` is present in `actual` with the same
/// value. Extra fields in `actual` (server-populated) are ignored; arrays must
/// match exactly.
pub fn is_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(k, v)| have.get(k).map_or(false, |a| is_subset(v, a))),
        (want, have) => want == have,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::{derive, CloudEnvironment};
    use crate::graph::builder::{build_graph, HOST, PLAN, STORAGE};
    use crate::types::params::RawParameters;

    fn graph() -> crate::graph::ResourceGraph {
        let params = RawParameters::new("hragent01", "eastus", "FC1", "2048", "40")
            .validate()
            .unwrap();
        build_graph(&params, &derive(&params, CloudEnvironment::AzureCloud)).unwrap()
    }

    fn target() -> Target {
        Target::new("sub-123", "rg-hr")
    }

    #[test]
    fn storage_enforces_tls_and_no_shared_keys() {
        let g = graph();
        let t = target();
        let cache = BTreeMap::new();
        let ctx = RenderContext { target: &t, materialized: &cache };
        let r = render(g.get(&NodeId::new(STORAGE)).unwrap(), &ctx).unwrap();
        assert_eq!(
            r.resource_id,
            "/subscriptions/sub-123/resourceGroups/rg-hr/providers/Microsoft.Storage/storageAccounts/hragent01sa"
        );
        assert_eq!(r.body["properties"]["minimumTlsVersion"], "TLS1_2");
        assert_eq!(r.body["properties"]["supportsHttpsTrafficOnly"], true);
        assert_eq!(r.body["properties"]["allowSharedKeyAccess"], false);
    }

    #[test]
    fn host_needs_materialized_plan() {
        let g = graph();
        let t = target();
        let cache = BTreeMap::new();
        let ctx = RenderContext { target: &t, materialized: &cache };
        let err = render(g.get(&NodeId::new(HOST)).unwrap(), &ctx).unwrap_err();
        assert_eq!(
            err,
            NodeFailure::MissingAttribute {
                node: NodeId::new(PLAN),
                attribute: "resource_id".into()
            }
        );
    }

    #[test]
    fn host_body_is_https_ftps_and_identity_based() {
        let g = graph();
        let t = target();
        let mut cache = BTreeMap::new();
        let mut plan = Attributes::new();
        plan.insert(Attribute::ResourceId, "/plan/id".to_string());
        cache.insert(NodeId::new(PLAN), plan);
        let ctx = RenderContext { target: &t, materialized: &cache };
        let r = render(g.get(&NodeId::new(HOST)).unwrap(), &ctx).unwrap();
        let props = &r.body["properties"];
        assert_eq!(props["serverFarmId"], "/plan/id");
        assert_eq!(props["httpsOnly"], true);
        assert_eq!(props["siteConfig"]["ftpsState"], "FtpsOnly");
        assert_eq!(props["siteConfig"]["minTlsVersion"], "1.2");
        assert_eq!(r.body["identity"]["type"], "SystemAssigned");
        assert_eq!(
            props["functionAppConfig"]["deployment"]["storage"]["authentication"]["type"],
            "SystemAssignedIdentity"
        );
        assert_eq!(props["functionAppConfig"]["scaleAndConcurrency"]["instanceMemoryMB"], 2048);
    }

    #[test]
    fn grant_renders_with_idempotency_key() {
        let g = graph();
        let t = target();
        let mut cache = BTreeMap::new();
        let mut host = Attributes::new();
        host.insert(Attribute::PrincipalId, "principal-1".to_string());
        cache.insert(NodeId::new(HOST), host);
        let mut storage = Attributes::new();
        storage.insert(Attribute::ResourceId, "/sa/id".to_string());
        cache.insert(NodeId::new(STORAGE), storage);
        let ctx = RenderContext { target: &t, materialized: &cache };

        let a = render(g.get(&NodeId::new("grant-blob")).unwrap(), &ctx).unwrap();
        let b = render(g.get(&NodeId::new("grant-blob")).unwrap(), &ctx).unwrap();
        assert_eq!(a.resource_id, b.resource_id);
        assert!(a.resource_id.starts_with("/sa/id/providers/Microsoft.Authorization/roleAssignments/"));
        assert_eq!(a.body["properties"]["principalId"], "principal-1");
        assert!(a.grant.is_some());
    }

    #[test]
    fn subset_ignores_server_fields() {
        let desired = json!({ "properties": { "httpsOnly": true } });
        let actual = json!({ "id": "x", "properties": { "httpsOnly": true, "state": "Running" } });
        assert!(is_subset(&desired, &actual));
        let drifted = json!({ "properties": { "httpsOnly": false } });
        assert!(!is_subset(&desired, &drifted));
        assert!(!is_subset(&desired, &json!({})));
    }
}
