//! Deployment orchestrator: publish the function code to the provisioned host
//! with a remote build.
//!
//! Inputs come from the environment (typically the env file written by
//! `provision`, overlaid by the process environment). The publish tool is run
//! once with inherited stdio; its exit code is the result. No retry.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::data::env_file::EnvFile;
use crate::errors::{DeployError, ToolNotFoundError};
use crate::infrastructure::runner::CommandRunner;

pub const PUBLISH_TOOL: &str = "func";

pub const HOST_NAME_VAR: &str = "FUNCTION_APP_NAME";
pub const SUBSCRIPTION_VAR: &str = "AZURE_SUBSCRIPTION_ID";
pub const RESOURCE_GROUP_VAR: &str = "AZURE_RESOURCE_GROUP_NAME";
pub const TOOL_OVERRIDE_VAR: &str = "FUNC_CLI_PATH";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployRequest {
    pub host_name: String,
    pub subscription_id: String,
    pub resource_group: String,
    /// Explicit publish tool path; skips the PATH search.
    pub tool_override: Option<PathBuf>,
    /// Value of PATH to search for the publish tool.
    pub search_path: Option<OsString>,
}

impl DeployRequest {
    pub fn from_env(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        DeployRequest {
            host_name: get(HOST_NAME_VAR),
            subscription_id: get(SUBSCRIPTION_VAR),
            resource_group: get(RESOURCE_GROUP_VAR),
            tool_override: vars
                .get(TOOL_OVERRIDE_VAR)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            search_path: vars.get("PATH").map(OsString::from),
        }
    }

    /// `base` (e.g. the env file) overlaid by the process environment.
    pub fn from_process_env(base: &HashMap<String, String>) -> Self {
        let mut req = DeployRequest::from_env(&EnvFile::overlay(base, &EnvFile::process()));
        req.search_path = std::env::var_os("PATH");
        req
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub host_name: String,
    pub tool: PathBuf,
    pub args: Vec<String>,
}

/// Publish arguments for `req`.
pub fn publish_args(req: &DeployRequest) -> Vec<String> {
    vec![
        "azure".into(),
        "functionapp".into(),
        "publish".into(),
        req.host_name.clone(),
        "--python".into(),
        "--build".into(),
        "remote".into(),
        "--subscription".into(),
        req.subscription_id.clone(),
        "--resource-group".into(),
        req.resource_group.clone(),
        "--no-interactive".into(),
    ]
}

/// Find the publish tool: the override if given, else `func` on `search_path`.
pub fn locate_tool(
    tool_override: Option<&Path>,
    search_path: Option<&OsString>,
) -> Result<PathBuf, ToolNotFoundError> {
    if let Some(path) = tool_override {
        if is_executable(path) {
            return Ok(path.to_path_buf());
        }
        return Err(ToolNotFoundError {
            tool: path.display().to_string(),
            searched: vec![path.to_path_buf()],
        });
    }

    let mut searched = Vec::new();
    if let Some(paths) = search_path {
        for dir in std::env::split_paths(paths) {
            for name in tool_names() {
                let candidate = dir.join(name);
                if is_executable(&candidate) {
                    return Ok(candidate);
                }
            }
            searched.push(dir);
        }
    }
    Err(ToolNotFoundError {
        tool: PUBLISH_TOOL.to_string(),
        searched,
    })
}

fn tool_names() -> &'static [&'static str] {
    if cfg!(windows) {
        &["func.cmd", "func.exe"]
    } else {
        &[PUBLISH_TOOL]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Run the publish tool once. Exit 0 is success; any other status, including
/// -1 for a signal, is `DeployError::Exit`.
pub fn deploy(req: &DeployRequest, runner: &dyn CommandRunner) -> Result<DeployOutcome, DeployError> {
    if req.host_name.is_empty() {
        return Err(DeployError::NotProvisioned);
    }
    if req.subscription_id.is_empty() {
        return Err(DeployError::MissingInput(SUBSCRIPTION_VAR.to_string()));
    }
    if req.resource_group.is_empty() {
        return Err(DeployError::MissingInput(RESOURCE_GROUP_VAR.to_string()));
    }

    let tool = locate_tool(req.tool_override.as_deref(), req.search_path.as_ref())?;
    let args = publish_args(req);
    info!(tool = %tool.display(), host = %req.host_name, "publishing with remote build");

    let code = runner
        .status(&tool, &args)
        .map_err(|source| DeployError::Launch {
            tool: tool.clone(),
            source,
        })?;
    if code != 0 {
        error!(code, host = %req.host_name, "publish failed");
        return Err(DeployError::Exit { code });
    }

    info!(host = %req.host_name, "publish complete");
    Ok(DeployOutcome {
        host_name: req.host_name.clone(),
        tool,
        args,
    })
}
