//! Command execution and result capture
//!
//! Every command runs as `sh -c "exec 2>&1; <command>"`, so the command's
//! stdout and stderr share a single pipe and keep their relative order. When
//! the shell is itself started through a wrapper (`docker exec`, `sudo`),
//! anything the wrapper prints to its own stderr therefore belongs to the
//! wrapper, which is how launch problems are told apart from a command that
//! ran and failed.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use crate::common::{Error, Result};

/// Captured result of a command that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecOutput {
    /// Combined stdout and stderr
    pub output: String,
    /// Process exit code (128 + signal for signal-terminated processes)
    pub exit_code: i32,
}

impl ExecOutput {
    pub fn new(output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            output: output.into(),
            exit_code,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output with surrounding whitespace removed
    pub fn trimmed(&self) -> &str {
        self.output.trim()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.output.contains(needle)
    }

    /// Require the exit code to be one of `allowed`
    pub fn expect_exit(self, command: &str, allowed: &[i32]) -> Result<Self> {
        if allowed.contains(&self.exit_code) {
            Ok(self)
        } else {
            Err(Error::assertion(format!(
                "'{}' exited with {} (accepted: {:?}). Output:\n{}",
                command,
                self.exit_code,
                allowed,
                self.trimmed()
            )))
        }
    }

    /// Require the output to contain `needle`
    pub fn expect_contains(self, command: &str, needle: &str) -> Result<Self> {
        if self.contains(needle) {
            Ok(self)
        } else {
            Err(Error::assertion(format!(
                "Output of '{}' does not contain '{}'. Output:\n{}",
                command,
                needle,
                self.trimmed()
            )))
        }
    }
}

/// Raw output of a launched process, before interpretation by a target
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ProcessOutput {
    /// Message printed by a wrapper process on its own stderr, if any
    pub fn wrapper_message(&self) -> Option<&str> {
        let msg = self.stderr.trim();
        (!msg.is_empty()).then_some(msg)
    }

    pub fn into_exec_output(self) -> ExecOutput {
        ExecOutput::new(self.stdout, self.exit_code)
    }
}

/// Shell script that folds stderr into stdout before running `command`
pub fn combined_script(command: &str) -> String {
    format!("exec 2>&1\n{}", command)
}

/// Launch `cmd`, capture its output and wait at most `timeout`
///
/// The child is killed if the deadline passes. `label` names the command
/// in errors and logs.
pub async fn run_process(
    mut cmd: Command,
    label: &str,
    timeout: Duration,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| Error::dispatch(label, format!("failed to launch: {}", e)))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(Error::dispatch(label, format!("failed to wait: {}", e))),
        Err(_) => {
            return Err(Error::Timeout {
                command: label.to_string(),
                secs: timeout.as_secs(),
            })
        }
    };

    let exit_code = exit_code(&output.status)
        .ok_or_else(|| Error::dispatch(label, "process ended without an exit status"))?;

    debug!(command = label, exit_code, "command finished");

    Ok(ProcessOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code,
    })
}

/// Run `command` with the host's `sh`, with combined output
pub async fn run_shell(command: &str, timeout: Duration) -> Result<ExecOutput> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(combined_script(command));
    let output = run_process(cmd, command, timeout).await?;
    Ok(output.into_exec_output())
}

#[cfg(unix)]
fn exit_code(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
}

#[cfg(not(unix))]
fn exit_code(status: &std::process::ExitStatus) -> Option<i32> {
    status.code()
}
