//! Resource manager backend driven through `az rest`.
//!
//! Requests are built as argument vectors and executed via a
//! `CommandRunner`, so the backend is testable without a network or an `az`
//! login. `az` handles authentication; we only deal in URLs, bodies and
//! error classification.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::ProviderError;
use crate::graph::node::ResourceKind;
use crate::types::config::PollSettings;

use super::runner::{CommandOutput, CommandRunner};
use super::{ControlPlane, RemoteResource};

// Failures are classified by the exact ARM error code (`ERROR: (Code) ...` or
// the `"code"` field of a JSON error body). Free text is consulted only when
// no code is present.

const NOT_FOUND_CODES: &[&str] = &[
    "ResourceNotFound",
    "ContainerNotFound",
    "RoleAssignmentNotFound",
    "NotFound",
];

const ALREADY_EXISTS_CODES: &[&str] = &["RoleAssignmentExists", "ContainerAlreadyExists", "AlreadyExists"];

const TRANSIENT_CODES: &[&str] = &[
    "TooManyRequests",
    "InternalServerError",
    "ServiceUnavailable",
    "GatewayTimeout",
    "AnotherOperationInProgress",
    "Conflict",
    "RetryableError",
    // A freshly created identity can take a while to replicate.
    "PrincipalNotFound",
];

/// Reason phrases `az rest` prints when the response carries no ARM code.
const TRANSIENT_REASONS: &[&str] = &[
    "Too Many Requests",
    "Internal Server Error",
    "Service Unavailable",
    "Gateway Timeout",
    "Conflict",
];

/// Client-side network failures; only consulted when there is no ARM code.
const CONNECTION_FAILURES: &[&str] = &["timed out", "Connection aborted", "Connection reset"];

pub struct ArmBackend<R: CommandRunner> {
    runner: R,
    az: PathBuf,
    resource_manager: String,
    poll: PollSettings,
}

impl<R: CommandRunner> ArmBackend<R> {
    pub fn new(runner: R, az: PathBuf, resource_manager: &str, poll: PollSettings) -> Self {
        ArmBackend {
            runner,
            az,
            resource_manager: resource_manager.trim_end_matches('/').to_string(),
            poll,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn url(&self, kind: ResourceKind, resource_id: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.resource_manager,
            resource_id,
            kind.api_version()
        )
    }

    pub fn get_args(&self, kind: ResourceKind, resource_id: &str) -> Vec<String> {
        vec![
            "rest".into(),
            "--method".into(),
            "get".into(),
            "--url".into(),
            self.url(kind, resource_id),
            "--output".into(),
            "json".into(),
        ]
    }

    pub fn put_args(&self, kind: ResourceKind, resource_id: &str, body: &Value) -> Vec<String> {
        vec![
            "rest".into(),
            "--method".into(),
            "put".into(),
            "--url".into(),
            self.url(kind, resource_id),
            "--body".into(),
            body.to_string(),
            "--headers".into(),
            "Content-Type=application/json".into(),
            "--output".into(),
            "json".into(),
        ]
    }

    fn run(&self, args: &[String]) -> Result<CommandOutput, ProviderError> {
        self.runner
            .output(&self.az, args)
            .map_err(|e| ProviderError::Rejected(format!("cannot run {}: {}", self.az.display(), e)))
    }

    /// Wait until a PUT's long-running operation reaches a terminal state.
    fn await_completion(
        &mut self,
        kind: ResourceKind,
        resource_id: &str,
        mut current: Option<RemoteResource>,
    ) -> Result<RemoteResource, ProviderError> {
        for attempt in 0..=self.poll.attempts {
            if let Some(resource) = current.take() {
                match resource.provisioning_state() {
                    None | Some("Succeeded") => return Ok(resource),
                    Some(state @ ("Failed" | "Canceled")) => {
                        return Err(ProviderError::Rejected(format!(
                            "{} ended in provisioning state {}",
                            resource_id, state
                        )))
                    }
                    Some(state) => {
                        debug!(resource = resource_id, state, attempt, "waiting for provisioning");
                    }
                }
            }
            if attempt == self.poll.attempts {
                break;
            }
            thread::sleep(Duration::from_millis(self.poll.interval_ms));
            current = self.get(kind, resource_id)?;
        }
        Err(ProviderError::Transient(format!(
            "{} did not finish provisioning after {} polls",
            resource_id, self.poll.attempts
        )))
    }
}

/// Map `az` stderr onto the provider error taxonomy.
pub fn classify(stderr: &str) -> ProviderError {
    let message = stderr.trim().to_string();
    match error_code(stderr) {
        Some(code) if ALREADY_EXISTS_CODES.contains(&code) => ProviderError::AlreadyExists(message),
        Some(code) if TRANSIENT_CODES.contains(&code) => ProviderError::Transient(message),
        Some(_) => ProviderError::Rejected(message),
        None => {
            let transient_reason = reason_phrase(stderr).is_some_and(|r| TRANSIENT_REASONS.contains(&r));
            if transient_reason || CONNECTION_FAILURES.iter().any(|m| stderr.contains(m)) {
                ProviderError::Transient(message)
            } else {
                ProviderError::Rejected(message)
            }
        }
    }
}

/// Failure of a finished `az` call. A blank stderr still names the status.
fn failure(out: &CommandOutput) -> ProviderError {
    if out.stderr.trim().is_empty() {
        ProviderError::Rejected(format!("az exited with status {} and no error output", out.status))
    } else {
        classify(&out.stderr)
    }
}

fn error_line(stderr: &str) -> Option<&str> {
    stderr
        .lines()
        .find_map(|l| l.trim().strip_prefix("ERROR:"))
        .map(str::trim)
}

/// ARM error code: `ERROR: (Code) message`, else the first JSON `"code"`.
fn error_code(stderr: &str) -> Option<&str> {
    if let Some(rest) = error_line(stderr).and_then(|l| l.strip_prefix('(')) {
        if let Some((code, _)) = rest.split_once(')') {
            let code = code.trim();
            if !code.is_empty() {
                return Some(code);
            }
        }
    }
    json_code(stderr)
}

fn json_code(text: &str) -> Option<&str> {
    let start = text.find("\"code\"")? + "\"code\"".len();
    let rest = text[start..]
        .trim_start()
        .strip_prefix(':')?
        .trim_start()
        .strip_prefix('"')?;
    rest.split_once('"')
        .map(|(code, _)| code)
        .filter(|code| !code.is_empty())
}

/// `Not Found({...})` -> `Not Found`.
fn reason_phrase(stderr: &str) -> Option<&str> {
    let line = error_line(stderr)?;
    let phrase = line.split('(').next().unwrap_or(line).trim();
    if phrase.is_empty() {
        None
    } else {
        Some(phrase)
    }
}

fn is_not_found(stderr: &str) -> bool {
    match error_code(stderr) {
        Some(code) => NOT_FOUND_CODES.contains(&code),
        None => reason_phrase(stderr) == Some("Not Found"),
    }
}

fn parse_body(resource_id: &str, stdout: &str) -> Result<Option<RemoteResource>, ProviderError> {
    if stdout.trim().is_empty() {
        return Ok(None);
    }
    let body: Value = serde_json::from_str(stdout)
        .map_err(|e| ProviderError::Malformed(format!("{}: {}", resource_id, e)))?;
    Ok(Some(RemoteResource::new(resource_id, body)))
}

impl<R: CommandRunner> ControlPlane for ArmBackend<R> {
    fn get(&mut self, kind: ResourceKind, resource_id: &str) -> Result<Option<RemoteResource>, ProviderError> {
        let out = self.run(&self.get_args(kind, resource_id))?;
        if out.success() {
            return parse_body(resource_id, &out.stdout);
        }
        if is_not_found(&out.stderr) {
            return Ok(None);
        }
        Err(failure(&out))
    }

    fn put(&mut self, kind: ResourceKind, resource_id: &str, body: &Value) -> Result<RemoteResource, ProviderError> {
        let out = self.run(&self.put_args(kind, resource_id, body))?;
        if !out.success() {
            let err = failure(&out);
            warn!(resource = resource_id, error = %err, "put failed");
            return Err(err);
        }
        let accepted = parse_body(resource_id, &out.stdout)?;
        if accepted.is_none() {
            // 202 Accepted with no body: fetch until the resource shows up.
            let current = self.get(kind, resource_id)?;
            return self.await_completion(kind, resource_id, current);
        }
        self.await_completion(kind, resource_id, accepted)
    }
}
