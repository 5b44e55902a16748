//! Provisioning entry points: plan, provision, and outputs.
//!
//! `run` validates input, derives names, builds the graph, converges it
//! against the prior state on disk, persists the new state and merges the
//! outputs into the env file. A failed or cancelled pass still persists the
//! partial state so the next run resumes.

use tracing::{info, warn};

use crate::convergence::cancel::CancelFlag;
use crate::convergence::engine::{ApplyReport, Engine};
use crate::convergence::state::ConvergedState;
use crate::data::outputs::Outputs;
use crate::derive::{derive, DerivedValues};
use crate::errors::ProvisionError;
use crate::graph::builder::build_graph;
use crate::graph::node::{NodeId, ResourceKind};
use crate::infrastructure::ControlPlane;
use crate::types::config::Settings;
use crate::types::params::Parameters;

/// One entry of the apply order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNode {
    pub id: NodeId,
    pub kind: ResourceKind,
    pub name: String,
    pub depends_on: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Plan {
    pub parameters: Parameters,
    pub derived: DerivedValues,
    pub order: Vec<PlannedNode>,
}

#[derive(Debug, Clone)]
pub struct ProvisionReport {
    pub parameters: Parameters,
    pub derived: DerivedValues,
    pub apply: ApplyReport,
    pub outputs: Outputs,
}

/// Validate, derive and order the graph without touching the cloud.
pub fn plan(settings: &Settings) -> Result<Plan, ProvisionError> {
    settings.target.validate()?;
    let parameters = settings.parameters.validate()?;
    let derived = derive(&parameters, settings.cloud);
    let graph = build_graph(&parameters, &derived)?;
    let order = graph
        .order()?
        .into_iter()
        .map(|n| PlannedNode {
            id: n.id.clone(),
            kind: n.kind(),
            name: n.name.clone(),
            depends_on: n.depends_on.clone(),
        })
        .collect();
    Ok(Plan {
        parameters,
        derived,
        order,
    })
}

/// Converge the infrastructure and publish outputs.
pub fn run(
    settings: &Settings,
    plane: &mut dyn ControlPlane,
    cancel: &CancelFlag,
) -> Result<ProvisionReport, ProvisionError> {
    settings.target.validate()?;
    let parameters = settings.parameters.validate()?;
    let derived = derive(&parameters, settings.cloud);
    let graph = build_graph(&parameters, &derived)?;
    let prior = ConvergedState::load(&settings.state_file)?;

    info!(
        base_name = %parameters.base_name,
        host = %derived.host_name,
        resource_group = %settings.target.resource_group,
        "provisioning"
    );

    let engine = Engine::new(settings.target.clone(), settings.retry.clone());
    let apply = match engine.apply(&graph, &prior, plane, cancel) {
        Ok(report) => report,
        Err(err) => {
            if let Some(partial) = err.partial_state() {
                if let Err(save_err) = partial.save(&settings.state_file) {
                    warn!(error = %save_err, "could not persist partial state");
                } else {
                    info!(nodes = partial.len(), path = %settings.state_file.display(), "partial state saved");
                }
            }
            return Err(err.into());
        }
    };
    apply.state.save(&settings.state_file)?;

    let outputs = Outputs::from_state(&apply.state, &derived);
    outputs
        .write_env_file(&settings.env_file)
        .map_err(|source| ProvisionError::Outputs {
            path: settings.env_file.clone(),
            source,
        })?;
    info!(env_file = %settings.env_file.display(), outputs = outputs.len(), "outputs written");

    Ok(ProvisionReport {
        parameters,
        derived,
        apply,
        outputs,
    })
}

/// Outputs from the state on disk, without contacting the cloud.
pub fn outputs(settings: &Settings) -> Result<Outputs, ProvisionError> {
    let parameters = settings.parameters.validate()?;
    let derived = derive(&parameters, settings.cloud);
    let state = ConvergedState::load(&settings.state_file)?;
    Ok(Outputs::from_state(&state, &derived))
}
