//! Command runner abstraction for external executables.
//!
//! `CommandRunner` is the trait backends and the deploy step use to run
//! programs. `ProcessRunner` is the production implementation. `MockRunner`
//! records invocations and returns preset responses.

use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Captured result of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; -1 when the process was killed by a signal.
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        CommandOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: &str) -> Self {
        CommandOutput {
            status,
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == 0
    }
}

pub trait CommandRunner {
    /// Run to completion, capturing stdout and stderr.
    fn output(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput>;

    /// Run to completion with inherited stdio; returns the exit code.
    fn status(&self, program: &Path, args: &[String]) -> io::Result<i32>;
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    /// Captured children get their own process group, so a terminal Ctrl-C
    /// reaches only flexprov and an in-flight request runs to completion.
    fn output(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        let mut command = Command::new(program);
        command.args(args).stdin(Stdio::null());
        own_process_group(&mut command);
        let output = command.output()?;
        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    fn status(&self, program: &Path, args: &[String]) -> io::Result<i32> {
        let status = Command::new(program).args(args).status()?;
        Ok(status.code().unwrap_or(-1))
    }
}

#[cfg(unix)]
fn own_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    command.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_command: &mut Command) {}

/// One recorded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

/// Test double: records invocations and replays queued responses in order.
/// With nothing queued, `output` returns empty success and `status` returns 0.
pub struct MockRunner {
    outputs: RefCell<Vec<io::Result<CommandOutput>>>,
    statuses: RefCell<Vec<i32>>,
    invocations: RefCell<Vec<Invocation>>,
}

impl MockRunner {
    pub fn new() -> Self {
        MockRunner {
            outputs: RefCell::new(Vec::new()),
            statuses: RefCell::new(Vec::new()),
            invocations: RefCell::new(Vec::new()),
        }
    }

    pub fn with_outputs(outputs: Vec<io::Result<CommandOutput>>) -> Self {
        let runner = MockRunner::new();
        let mut reversed = outputs;
        reversed.reverse();
        *runner.outputs.borrow_mut() = reversed;
        runner
    }

    pub fn with_status(status: i32) -> Self {
        let runner = MockRunner::new();
        runner.statuses.borrow_mut().push(status);
        runner
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.borrow().clone()
    }

    fn record(&self, program: &Path, args: &[String]) {
        self.invocations.borrow_mut().push(Invocation {
            program: program.to_path_buf(),
            args: args.to_vec(),
        });
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRunner for MockRunner {
    fn output(&self, program: &Path, args: &[String]) -> io::Result<CommandOutput> {
        self.record(program, args);
        self.outputs
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| Ok(CommandOutput::ok("")))
    }

    fn status(&self, program: &Path, args: &[String]) -> io::Result<i32> {
        self.record(program, args);
        Ok(self.statuses.borrow_mut().pop().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn mock_records_invocations() {
        let runner = MockRunner::new();
        runner.output(Path::new("az"), &args(&["rest", "--method", "get"])).unwrap();
        runner.status(Path::new("func"), &args(&["azure"])).unwrap();
        let calls = runner.invocations();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].program, PathBuf::from("az"));
        assert_eq!(calls[0].args, args(&["rest", "--method", "get"]));
        assert_eq!(calls[1].program, PathBuf::from("func"));
    }

    #[test]
    fn mock_replays_outputs_in_order() {
        let runner = MockRunner::with_outputs(vec![
            Ok(CommandOutput::ok("first")),
            Ok(CommandOutput::failed(1, "boom")),
        ]);
        assert_eq!(runner.output(Path::new("x"), &[]).unwrap().stdout, "first");
        let second = runner.output(Path::new("x"), &[]).unwrap();
        assert!(!second.success());
        assert_eq!(second.stderr, "boom");
        assert!(runner.output(Path::new("x"), &[]).unwrap().success());
    }

    #[test]
    fn mock_status_defaults_to_zero() {
        assert_eq!(MockRunner::new().status(Path::new("x"), &[]).unwrap(), 0);
        assert_eq!(MockRunner::with_status(7).status(Path::new("x"), &[]).unwrap(), 7);
    }

    #[cfg(unix)]
    #[test]
    fn process_runner_reports_exit_code() {
        let runner = ProcessRunner;
        let out = runner
            .output(Path::new("sh"), &args(&["-c", "echo hi; exit 3"]))
            .unwrap();
        assert_eq!(out.status, 3);
        assert_eq!(out.stdout.trim(), "hi");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn captured_child_leads_its_own_process_group() {
        // Field 5 of /proc/<pid>/stat is the process group id.
        let out = ProcessRunner
            .output(
                Path::new("sh"),
                &args(&["-c", "echo $$; cut -d' ' -f5 /proc/$$/stat"]),
            )
            .unwrap();
        let lines: Vec<i32> = out
            .stdout
            .lines()
            .map(|l| l.trim().parse().unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], lines[1]);
        assert_ne!(lines[1], unsafe { libc::getpgrp() });
    }

    #[cfg(unix)]
    #[test]
    fn group_interrupt_does_not_reach_the_runner() {
        // The child interrupts its whole group; that must not include us.
        let out = ProcessRunner
            .output(
                Path::new("sh"),
                &args(&["-c", "trap 'echo interrupted' INT; kill -INT 0; echo finished"]),
            )
            .unwrap();
        assert_eq!(out.status, 0);
        assert!(out.stdout.contains("finished"));
    }

    #[test]
    fn process_runner_missing_program_is_io_error() {
        let runner = ProcessRunner;
        assert!(runner
            .output(Path::new("/definitely/not/a/program"), &[])
            .is_err());
    }
}
