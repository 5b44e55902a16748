use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::convergence::retry::RetryPolicy;
use crate::derive::CloudEnvironment;
use crate::types::params::{RawParameters, Target};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Exponential,
    Linear,
    Fixed,
}

/// How long to wait for a long-running PUT to reach a terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PollSettings {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for PollSettings {
    /// 60 polls, 5s apart.
    fn default() -> Self {
        PollSettings {
            attempts: 60,
            interval_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub parameters: RawParameters,
    pub target: Target,
    pub cloud: CloudEnvironment,
    pub retry: RetryPolicy,
    pub poll: PollSettings,
    /// `az` executable used by the resource manager backend.
    pub az_cli: String,
    pub state_file: PathBuf,
    pub env_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        crate::data::settings::default_settings()
    }
}
