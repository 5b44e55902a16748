//! Builds the resource graph for one function host deployment.

use tracing::debug;

use crate::access::REQUIRED_ROLES;
use crate::derive::DerivedValues;
use crate::errors::GraphError;
use crate::types::params::Parameters;

use super::node::*;
use super::ResourceGraph;

pub const STORAGE: &str = "storage";
pub const BLOB_SERVICE: &str = "blob-service";
pub const CONTAINER: &str = "deployment-container";
pub const PLAN: &str = "plan";
pub const HOST: &str = "host";

pub const STORAGE_SKU: &str = "Standard_LRS";
pub const RUNTIME_NAME: &str = "python";
pub const RUNTIME_VERSION: &str = "3.11";

/// Node id of the grant for a role purpose (`grant-blob`, ...).
pub fn grant_node_id(purpose: &str) -> String {
    format!("grant-{}", purpose)
}

/// Declare storage, blob service, deployment container, plan, host, and one
/// role assignment per required data role, then validate the result.
pub fn build_graph(params: &Parameters, derived: &DerivedValues) -> Result<ResourceGraph, GraphError> {
    let storage = NodeId::new(STORAGE);
    let blob_service = NodeId::new(BLOB_SERVICE);
    let container = NodeId::new(CONTAINER);
    let plan = NodeId::new(PLAN);
    let host = NodeId::new(HOST);

    let mut graph = ResourceGraph::new();

    graph.add(ResourceNode::new(
        STORAGE,
        &derived.storage_account_name,
        ResourceSpec::StorageAccount(StorageAccountSpec {
            location: params.location.clone(),
            sku: STORAGE_SKU.to_string(),
        }),
    ))?;

    graph.add(
        ResourceNode::new(
            BLOB_SERVICE,
            "default",
            ResourceSpec::BlobService(BlobServiceSpec {
                account: storage.clone(),
            }),
        )
        .depends_on(&storage),
    )?;

    graph.add(
        ResourceNode::new(
            CONTAINER,
            &derived.deployment_container_name,
            ResourceSpec::BlobContainer(BlobContainerSpec {
                account: storage.clone(),
            }),
        )
        .depends_on(&blob_service)
        .depends_on(&storage),
    )?;

    graph.add(ResourceNode::new(
        PLAN,
        &derived.plan_name,
        ResourceSpec::ServicePlan(ServicePlanSpec {
            location: params.location.clone(),
            tier: params.tier,
        }),
    ))?;

    graph.add(
        ResourceNode::new(
            HOST,
            &derived.host_name,
            ResourceSpec::ComputeHost(ComputeHostSpec {
                location: params.location.clone(),
                plan: plan.clone(),
                storage_account_name: derived.storage_account_name.clone(),
                deployment_container_url: derived.deployment_container_url(),
                blob_endpoint: derived.blob_endpoint.clone(),
                queue_endpoint: derived.queue_endpoint.clone(),
                table_endpoint: derived.table_endpoint.clone(),
                instance_memory: params.instance_memory,
                max_instance_count: params.max_instance_count,
                runtime: FunctionRuntime {
                    name: RUNTIME_NAME.to_string(),
                    version: RUNTIME_VERSION.to_string(),
                },
            }),
        )
        .depends_on(&container)
        .depends_on(&plan)
        .depends_on(&storage),
    )?;

    for role in REQUIRED_ROLES {
        let id = grant_node_id(role.purpose());
        graph.add(
            ResourceNode::new(
                &id,
                &role.to_string(),
                ResourceSpec::RoleAssignment(RoleAssignmentSpec {
                    role,
                    principal: host.clone(),
                    scope: storage.clone(),
                }),
            )
            .depends_on(&host)
            .depends_on(&storage),
        )?;
    }

    graph.validate()?;
    debug!(nodes = graph.len(), host = %derived.host_name, "resource graph built");
    Ok(graph)
}
