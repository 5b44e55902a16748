//! End-to-end provisioning against the in-memory control plane.

use std::path::Path;

use flexprov_core::convergence::cancel::CancelFlag;
use flexprov_core::convergence::engine::NodeOutcome;
use flexprov_core::convergence::retry::RetryPolicy;
use flexprov_core::convergence::state::ConvergedState;
use flexprov_core::data::env_file::EnvFile;
use flexprov_core::data::outputs::{
    API_FUNCTION_ENDPOINT, API_FUNCTION_RESOURCE_ID, FUNCTION_APP_DEFAULT_DOMAIN, FUNCTION_APP_NAME,
};
use flexprov_core::data::settings::default_settings;
use flexprov_core::errors::{ProviderError, ProvisionError};
use flexprov_core::graph::node::{NodeId, ResourceKind};
use flexprov_core::infrastructure::mock::{FaultOp, InMemoryControlPlane};
use flexprov_core::provision;
use flexprov_core::types::config::{BackoffStrategy, Settings};
use flexprov_core::types::params::Target;

fn settings(dir: &Path) -> Settings {
    let mut s = default_settings();
    s.parameters.base_name = "hragent01".into();
    s.parameters.location = "eastus".into();
    s.parameters.tier = "FC1".into();
    s.parameters.instance_memory_mb = "2048".into();
    s.parameters.max_instance_count = "40".into();
    s.target = Target::new("sub-123", "rg-hr");
    s.retry = RetryPolicy::new(2, BackoffStrategy::Fixed, 0);
    s.state_file = dir.join("state").join("state.json");
    s.env_file = dir.join(".env");
    s
}

#[test]
fn provisions_complete_function_app() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let mut plane = InMemoryControlPlane::new();

    let report = provision::run(&s, &mut plane, &CancelFlag::new()).unwrap();

    assert_eq!(report.derived.storage_account_name, "hragent01sa");
    assert_eq!(report.derived.host_name, "hragent01-func");
    assert_eq!(report.apply.count(NodeOutcome::Created), 8);
    assert_eq!(report.apply.state.count_kind(ResourceKind::RoleAssignment), 3);
    assert_eq!(plane.find("/roleAssignments/").len(), 3);
    assert!(!plane.find("storageAccounts/hragent01sa").is_empty());
    assert_eq!(plane.find("sites/hragent01-func").len(), 1);

    let out = &report.outputs;
    assert_eq!(
        out.get(API_FUNCTION_ENDPOINT),
        Some("https://hragent01-func.azurewebsites.net")
    );
    assert_eq!(out.get(FUNCTION_APP_NAME), Some("hragent01-func"));
    assert_eq!(
        out.get(FUNCTION_APP_DEFAULT_DOMAIN),
        Some("hragent01-func.azurewebsites.net")
    );
    assert_eq!(
        out.get(API_FUNCTION_RESOURCE_ID),
        Some("/subscriptions/sub-123/resourceGroups/rg-hr/providers/Microsoft.Web/sites/hragent01-func")
    );

    let env = EnvFile::load(&s.env_file).unwrap();
    assert_eq!(env.get(FUNCTION_APP_NAME).map(String::as_str), Some("hragent01-func"));
}

#[test]
fn grants_are_scoped_to_the_storage_account_for_the_host_identity() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let mut plane = InMemoryControlPlane::new();
    provision::run(&s, &mut plane, &CancelFlag::new()).unwrap();

    let (_, site) = plane.find("sites/hragent01-func")[0];
    let principal = site["identity"]["principalId"].clone();
    let storage_id =
        "/subscriptions/sub-123/resourceGroups/rg-hr/providers/Microsoft.Storage/storageAccounts/hragent01sa";

    let grants = plane.find("/roleAssignments/");
    let mut roles: Vec<String> = grants
        .iter()
        .map(|(id, body)| {
            assert!(id.starts_with(storage_id));
            assert_eq!(body["properties"]["principalId"], principal);
            body["properties"]["roleDefinitionId"]
                .as_str()
                .unwrap()
                .rsplit('/')
                .next()
                .unwrap()
                .to_string()
        })
        .collect();
    roles.sort();
    assert_eq!(
        roles,
        vec![
            "0a9a7e1f-b9d0-4cc4-a60d-0319b160aaa3",
            "974c5e8b-45b9-4653-ba55-5f855dd0fb88",
            "ba92f5b4-2d11-453d-a403-e96b0029c9fe",
        ]
    );
}

#[test]
fn second_run_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let mut plane = InMemoryControlPlane::new();

    let first = provision::run(&s, &mut plane, &CancelFlag::new()).unwrap();
    let resources = plane.resources.clone();
    plane.clear_calls();

    let second = provision::run(&s, &mut plane, &CancelFlag::new()).unwrap();
    assert_eq!(second.derived, first.derived);
    assert_eq!(second.apply.count(NodeOutcome::Skipped), 8);
    assert_eq!(plane.put_count(), 0);
    assert_eq!(plane.resources, resources);
    assert_eq!(second.outputs, first.outputs);
}

#[test]
fn lost_state_file_converges_without_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let mut plane = InMemoryControlPlane::new();
    provision::run(&s, &mut plane, &CancelFlag::new()).unwrap();

    std::fs::remove_file(&s.state_file).unwrap();
    let again = provision::run(&s, &mut plane, &CancelFlag::new()).unwrap();
    assert_eq!(again.apply.count(NodeOutcome::Unchanged), 8);
    assert_eq!(plane.find("/roleAssignments/").len(), 3);
}

#[test]
fn failed_run_resumes_from_failed_node() {
    let dir = tempfile::tempdir().unwrap();
    let s = settings(dir.path());
    let mut plane = InMemoryControlPlane::new();
    plane.inject(FaultOp::Put, "sites/", ProviderError::Rejected("quota exceeded".into()), 1);

    let err = provision::run(&s, &mut plane, &CancelFlag::new()).unwrap_err();
    match &err {
        ProvisionError::Convergence(e) => {
            assert_eq!(e.failed_node(), Some(&NodeId::new("host")));
        }
        other => panic!("unexpected {:?}", other),
    }
    let partial = ConvergedState::load(&s.state_file).unwrap();
    assert_eq!(partial.len(), 4);
    assert!(!s.env_file.exists());

    plane.clear_calls();
    let report = provision::run(&s, &mut plane, &CancelFlag::new()).unwrap();
    assert_eq!(report.apply.count(NodeOutcome::Skipped), 4);
    assert_eq!(report.apply.count(NodeOutcome::Created), 4);
    let puts = plane.puts();
    assert_eq!(puts.len(), 4);
    assert!(puts[0].ends_with("sites/hragent01-func"));
    assert!(puts[1..].iter().all(|id| id.contains("/roleAssignments/")));
}

#[test]
fn invalid_base_name_fails_before_any_remote_call() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = settings(dir.path());
    s.parameters.base_name = "Bad_Name".into();
    let mut plane = InMemoryControlPlane::new();

    let err = provision::run(&s, &mut plane, &CancelFlag::new()).unwrap_err();
    match err {
        ProvisionError::Validation(v) => assert_eq!(v.field, "base_name"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(plane.calls.is_empty());
    assert!(!s.state_file.exists());
}
