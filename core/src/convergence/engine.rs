//! Convergence engine: walks the resource graph in dependency order and
//! brings each node to its desired state through a `ControlPlane`.
//!
//! Each node is rendered against the attributes materialized earlier in the
//! same pass, fingerprinted, and then either skipped (the prior run already
//! applied exactly this body) or upserted: GET, compare, PUT when absent or
//! drifted. Transient provider errors are retried per node. On failure or
//! cancellation the state converged so far is returned with the error so the
//! next run resumes where this one stopped.

use std::collections::BTreeMap;
use std::fmt;
use std::thread;

use tracing::{debug, info, info_span, warn};

use crate::errors::{ConvergenceError, NodeFailure, ProviderError};
use crate::graph::node::{Attribute, Attributes, NodeId, ResourceKind, ResourceNode};
use crate::graph::render::{is_subset, render, RenderContext, RenderedResource};
use crate::graph::ResourceGraph;
use crate::infrastructure::{ControlPlane, RemoteResource};
use crate::types::params::Target;

use super::cancel::CancelFlag;
use super::retry::{NodeRetryTracker, RetryPolicy};
use super::state::{fingerprint, ConvergedState, MaterializedNode};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Did not exist; created.
    Created,
    /// Existed but differed from the desired body; updated in place.
    Updated,
    /// Existed and already matched.
    Unchanged,
    /// Prior state recorded this exact body; no request sent.
    Skipped,
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeOutcome::Created => "created",
            NodeOutcome::Updated => "updated",
            NodeOutcome::Unchanged => "unchanged",
            NodeOutcome::Skipped => "skipped",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReport {
    pub node: NodeId,
    pub kind: ResourceKind,
    pub outcome: NodeOutcome,
    pub resource_id: String,
    /// Requests attempted, including retries. Zero when skipped.
    pub attempts: u32,
}

/// Result of a successful pass.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub state: ConvergedState,
    pub nodes: Vec<NodeReport>,
}

impl ApplyReport {
    pub fn count(&self, outcome: NodeOutcome) -> usize {
        self.nodes.iter().filter(|n| n.outcome == outcome).count()
    }

    /// Nodes that needed a create or update.
    pub fn changed(&self) -> usize {
        self.count(NodeOutcome::Created) + self.count(NodeOutcome::Updated)
    }

    pub fn node(&self, id: &NodeId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.node == id)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    target: Target,
    retry: RetryPolicy,
}

impl Engine {
    pub fn new(target: Target, retry: RetryPolicy) -> Self {
        Engine { target, retry }
    }

    /// Converge every node of `graph`. `prior` is read, never modified.
    pub fn apply(
        &self,
        graph: &ResourceGraph,
        prior: &ConvergedState,
        plane: &mut dyn ControlPlane,
        cancel: &CancelFlag,
    ) -> Result<ApplyReport, ConvergenceError> {
        let order = graph.order()?;
        let mut state = ConvergedState::new();
        let mut materialized: BTreeMap<NodeId, Attributes> = BTreeMap::new();
        let mut tracker = NodeRetryTracker::new(self.retry.clone());
        let mut reports = Vec::with_capacity(order.len());

        info!(nodes = order.len(), prior = prior.len(), "starting convergence pass");

        for node in order {
            if cancel.is_cancelled() {
                warn!(next = %node.id, "convergence cancelled");
                return Err(ConvergenceError::Cancelled {
                    next: node.id.clone(),
                    partial: Box::new(carry_forward(state, prior)),
                });
            }

            let span = info_span!("node", id = %node.id, kind = %node.kind());
            let _guard = span.enter();

            match self.converge_node(node, prior, &materialized, plane, &mut tracker) {
                Ok((record, report)) => {
                    info!(outcome = %report.outcome, attempts = report.attempts, "node converged");
                    materialized.insert(node.id.clone(), record.attributes.clone());
                    state.insert(node.id.clone(), record);
                    reports.push(report);
                }
                Err(cause) => {
                    warn!(error = %cause, "node failed");
                    return Err(ConvergenceError::NodeFailed {
                        node: node.id.clone(),
                        kind: node.kind(),
                        cause,
                        partial: Box::new(carry_forward(state, prior)),
                    });
                }
            }
        }

        let report = ApplyReport {
            state: carry_forward(state, prior),
            nodes: reports,
        };
        info!(
            created = report.count(NodeOutcome::Created),
            updated = report.count(NodeOutcome::Updated),
            unchanged = report.count(NodeOutcome::Unchanged),
            skipped = report.count(NodeOutcome::Skipped),
            "convergence pass complete"
        );
        Ok(report)
    }

    fn converge_node(
        &self,
        node: &ResourceNode,
        prior: &ConvergedState,
        materialized: &BTreeMap<NodeId, Attributes>,
        plane: &mut dyn ControlPlane,
        tracker: &mut NodeRetryTracker,
    ) -> Result<(MaterializedNode, NodeReport), NodeFailure> {
        let ctx = RenderContext {
            target: &self.target,
            materialized,
        };
        let rendered = render(node, &ctx)?;
        let fp = fingerprint(&rendered.body);
        let kind = node.kind();

        if let Some(previous) = prior.get(&node.id) {
            if previous.kind == kind
                && previous.resource_id == rendered.resource_id
                && previous.fingerprint == fp
            {
                debug!(resource = %rendered.resource_id, "unchanged since last run");
                let report = NodeReport {
                    node: node.id.clone(),
                    kind,
                    outcome: NodeOutcome::Skipped,
                    resource_id: rendered.resource_id,
                    attempts: 0,
                };
                return Ok((previous.clone(), report));
            }
        }

        let mut attempts = 0;
        let (outcome, remote) = loop {
            attempts += 1;
            match upsert(kind, &rendered, plane) {
                Ok(done) => {
                    tracker.record_success(&node.id);
                    break done;
                }
                Err(e) if e.is_transient() => {
                    let failures = tracker.record_failure(&node.id);
                    if !tracker.can_retry(&node.id) {
                        return Err(e.into());
                    }
                    let delay = tracker.next_delay(&node.id);
                    warn!(
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                }
                Err(e) => return Err(e.into()),
            }
        };

        let attributes = capture_attributes(node, &rendered, &remote)?;
        let record = MaterializedNode {
            kind,
            resource_id: rendered.resource_id.clone(),
            fingerprint: fp,
            attributes,
        };
        let report = NodeReport {
            node: node.id.clone(),
            kind,
            outcome,
            resource_id: rendered.resource_id,
            attempts,
        };
        Ok((record, report))
    }
}

/// GET, then PUT if absent or drifted. A role assignment that already exists
/// under another name is the same grant, so it counts as unchanged.
fn upsert(
    kind: ResourceKind,
    rendered: &RenderedResource,
    plane: &mut dyn ControlPlane,
) -> Result<(NodeOutcome, RemoteResource), ProviderError> {
    let id = rendered.resource_id.as_str();
    let outcome = match plane.get(kind, id)? {
        Some(current) if is_subset(&rendered.body, &current.body) => {
            return Ok((NodeOutcome::Unchanged, current));
        }
        Some(_) => NodeOutcome::Updated,
        None => NodeOutcome::Created,
    };
    match plane.put(kind, id, &rendered.body) {
        Ok(remote) => Ok((outcome, remote)),
        Err(ProviderError::AlreadyExists(msg)) if kind == ResourceKind::RoleAssignment => {
            debug!(resource = id, detail = %msg, "grant already present");
            Ok((NodeOutcome::Unchanged, RemoteResource::new(id, rendered.body.clone())))
        }
        Err(e) => Err(e),
    }
}

fn capture_attributes(
    node: &ResourceNode,
    rendered: &RenderedResource,
    remote: &RemoteResource,
) -> Result<Attributes, NodeFailure> {
    let mut attributes = Attributes::new();
    attributes.insert(Attribute::ResourceId, rendered.resource_id.clone());
    if node.kind() == ResourceKind::ComputeHost {
        let principal = remote
            .principal_id()
            .ok_or_else(|| NodeFailure::MissingAttribute {
                node: node.id.clone(),
                attribute: Attribute::PrincipalId.as_str().to_string(),
            })?;
        attributes.insert(Attribute::PrincipalId, principal.to_string());
        if let Some(host) = remote.default_host_name() {
            attributes.insert(Attribute::DefaultHostName, host.to_string());
        }
    }
    Ok(attributes)
}

/// Keep prior records for nodes this pass did not reach.
fn carry_forward(mut state: ConvergedState, prior: &ConvergedState) -> ConvergedState {
    for (id, node) in &prior.nodes {
        state.nodes.entry(id.clone()).or_insert_with(|| node.clone());
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::{derive, CloudEnvironment};
    use crate::graph::builder::{build_graph, BLOB_SERVICE, CONTAINER, HOST, PLAN, STORAGE};
    use crate::infrastructure::mock::{FaultOp, InMemoryControlPlane};
    use crate::types::config::BackoffStrategy;
    use crate::types::params::RawParameters;

    fn graph_with(max_instances: &str) -> ResourceGraph {
        let params = RawParameters::new("hragent01", "eastus", "FC1", "2048", max_instances)
            .validate()
            .unwrap();
        build_graph(&params, &derive(&params, CloudEnvironment::AzureCloud)).unwrap()
    }

    fn graph() -> ResourceGraph {
        graph_with("40")
    }

    fn engine(retries: u32) -> Engine {
        Engine::new(
            Target::new("sub-123", "rg-hr"),
            RetryPolicy::new(retries, BackoffStrategy::Fixed, 0),
        )
    }

    fn id(s: &str) -> NodeId {
        NodeId::new(s)
    }

    #[test]
    fn first_apply_creates_everything() {
        let mut plane = InMemoryControlPlane::new();
        let report = engine(0)
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap();
        assert_eq!(report.nodes.len(), 8);
        assert_eq!(report.count(NodeOutcome::Created), 8);
        assert_eq!(report.state.len(), 8);
        assert_eq!(plane.find("/roleAssignments/").len(), 3);
        assert!(report.state.attribute(&id(HOST), Attribute::PrincipalId).is_some());
        assert_eq!(
            report.state.attribute(&id(HOST), Attribute::DefaultHostName),
            Some("hragent01-func.azurewebsites.net")
        );
    }

    #[test]
    fn second_apply_with_state_sends_nothing() {
        let mut plane = InMemoryControlPlane::new();
        let e = engine(0);
        let first = e
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap();
        let snapshot = plane.resources.clone();
        plane.clear_calls();

        let second = e.apply(&graph(), &first.state, &mut plane, &CancelFlag::new()).unwrap();
        assert_eq!(second.count(NodeOutcome::Skipped), 8);
        assert!(plane.calls.is_empty());
        assert_eq!(plane.resources, snapshot);
        assert_eq!(second.state, first.state);
    }

    #[test]
    fn apply_without_state_matches_existing_resources() {
        let mut plane = InMemoryControlPlane::new();
        let e = engine(0);
        e.apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap();
        plane.clear_calls();

        let again = e
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap();
        assert_eq!(again.count(NodeOutcome::Unchanged), 8);
        assert_eq!(plane.put_count(), 0);
        assert_eq!(plane.find("/roleAssignments/").len(), 3);
    }

    #[test]
    fn failure_returns_partial_state_and_resume_skips_converged_nodes() {
        let mut plane = InMemoryControlPlane::new();
        plane.inject(FaultOp::Put, "containers/", ProviderError::Rejected("quota".into()), 1);
        let e = engine(0);

        let err = e
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap_err();
        assert_eq!(err.failed_node(), Some(&id(CONTAINER)));
        let partial = err.partial_state().unwrap().clone();
        assert!(partial.get(&id(STORAGE)).is_some());
        assert!(partial.get(&id(BLOB_SERVICE)).is_some());
        assert!(partial.get(&id(CONTAINER)).is_none());
        assert!(partial.get(&id(HOST)).is_none());

        let storage_id = partial.get(&id(STORAGE)).unwrap().resource_id.clone();
        plane.clear_calls();
        let report = e.apply(&graph(), &partial, &mut plane, &CancelFlag::new()).unwrap();
        assert_eq!(report.node(&id(STORAGE)).unwrap().outcome, NodeOutcome::Skipped);
        assert_eq!(report.node(&id(BLOB_SERVICE)).unwrap().outcome, NodeOutcome::Skipped);
        assert_eq!(report.node(&id(CONTAINER)).unwrap().outcome, NodeOutcome::Created);
        assert!(!plane.puts().contains(&storage_id.as_str()));
        assert_eq!(report.state.len(), 8);
    }

    #[test]
    fn transient_errors_are_retried() {
        let mut plane = InMemoryControlPlane::new();
        plane.inject(FaultOp::Put, "sites/", ProviderError::Transient("429".into()), 2);
        let report = engine(3)
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap();
        let host = report.node(&id(HOST)).unwrap();
        assert_eq!(host.outcome, NodeOutcome::Created);
        assert_eq!(host.attempts, 3);
    }

    #[test]
    fn retry_budget_exhausted_fails_node() {
        let mut plane = InMemoryControlPlane::new();
        plane.inject(FaultOp::Put, "serverfarms/", ProviderError::Transient("503".into()), 5);
        let err = engine(1)
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap_err();
        match err {
            ConvergenceError::NodeFailed { node, cause, .. } => {
                assert_eq!(node, id(PLAN));
                assert!(matches!(cause, NodeFailure::Provider(ProviderError::Transient(_))));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejected_errors_are_not_retried() {
        let mut plane = InMemoryControlPlane::new();
        plane.inject(FaultOp::Put, "storageAccounts/", ProviderError::Rejected("denied".into()), 1);
        let err = engine(3)
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap_err();
        assert_eq!(err.failed_node(), Some(&id(STORAGE)));
        assert_eq!(plane.put_count(), 1);
    }

    #[test]
    fn cancelled_before_start_sends_nothing() {
        let mut plane = InMemoryControlPlane::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = engine(0)
            .apply(&graph(), &ConvergedState::new(), &mut plane, &cancel)
            .unwrap_err();
        match err {
            ConvergenceError::Cancelled { next, partial } => {
                assert_eq!(next, id(STORAGE));
                assert!(partial.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(plane.calls.is_empty());
    }

    #[test]
    fn existing_grant_under_other_name_is_unchanged() {
        let mut plane = InMemoryControlPlane::new();
        plane.inject(
            FaultOp::Put,
            "/roleAssignments/",
            ProviderError::AlreadyExists("RoleAssignmentExists".into()),
            1,
        );
        let report = engine(0)
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap();
        assert_eq!(
            report.node(&id("grant-blob")).unwrap().outcome,
            NodeOutcome::Unchanged
        );
        assert_eq!(report.state.count_kind(ResourceKind::RoleAssignment), 3);
    }

    #[test]
    fn changed_parameters_update_only_affected_nodes() {
        let mut plane = InMemoryControlPlane::new();
        let e = engine(0);
        let first = e
            .apply(&graph(), &ConvergedState::new(), &mut plane, &CancelFlag::new())
            .unwrap();
        let principal = first.state.attribute(&id(HOST), Attribute::PrincipalId).map(String::from);

        let report = e
            .apply(&graph_with("100"), &first.state, &mut plane, &CancelFlag::new())
            .unwrap();
        assert_eq!(report.node(&id(HOST)).unwrap().outcome, NodeOutcome::Updated);
        assert_eq!(report.node(&id(STORAGE)).unwrap().outcome, NodeOutcome::Skipped);
        assert_eq!(report.node(&id("grant-queue")).unwrap().outcome, NodeOutcome::Skipped);
        assert_eq!(report.changed(), 1);
        assert_eq!(
            report.state.attribute(&id(HOST), Attribute::PrincipalId).map(String::from),
            principal
        );
    }

    #[test]
    fn unreached_prior_records_are_kept() {
        let mut prior = ConvergedState::new();
        prior.insert(
            id("retired"),
            MaterializedNode {
                kind: ResourceKind::StorageAccount,
                resource_id: "/old".into(),
                fingerprint: "x".into(),
                attributes: Attributes::new(),
            },
        );
        let mut plane = InMemoryControlPlane::new();
        let report = engine(0).apply(&graph(), &prior, &mut plane, &CancelFlag::new()).unwrap();
        assert!(report.state.get(&id("retired")).is_some());
        assert_eq!(report.state.len(), 9);
        assert!(prior.get(&id(STORAGE)).is_none());
    }
}
