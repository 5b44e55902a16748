//! flexprov core: provision an Azure Flex Consumption function app from a
//! declarative resource graph, then publish code to it.
//!
//! The pipeline is `types::params` → `derive` → `graph` → `convergence` →
//! `data::outputs`, with `infrastructure` as the seam to the cloud and
//! `deploy` as a separate step.

pub mod access;
pub mod convergence;
pub mod data;
pub mod deploy;
pub mod derive;
pub mod errors;
pub mod graph;
pub mod infrastructure;
pub mod provision;
pub mod types;
