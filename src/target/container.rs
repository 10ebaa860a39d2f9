//! Ephemeral container target
//!
//! Drives a Docker-compatible runtime CLI. The container runs privileged with
//! the cgroup hierarchy mounted so that systemd can boot inside it, which the
//! service checks rely on.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::exec::{combined_script, run_process, ExecOutput, ProcessOutput};
use super::transcript::Transcript;
use super::{ExecutionTarget, TargetMode};
use crate::common::config::TargetConfig;
use crate::common::{epoch_millis, Error, Result};

const PULL_TIMEOUT: Duration = Duration::from_secs(600);
const CONTROL_TIMEOUT: Duration = Duration::from_secs(60);
const OS_INFO_TIMEOUT: Duration = Duration::from_secs(30);

/// Runtime messages that mean `exec` never reached the container
const DISPATCH_ERROR_MARKERS: &[&str] = &[
    "Error response from daemon",
    "No such container",
    "is not running",
    "Cannot connect to the",
    "OCI runtime exec failed",
];

/// Exit codes the runtime uses when the shell could not be launched
const RUNTIME_LAUNCH_CODES: &[i32] = &[126, 127];

/// Container lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    /// Nothing provisioned yet
    Idle,
    /// Created but not (yet) started
    Created { id: String },
    /// Running and accepting commands
    Running { id: String },
    /// Removed; no further commands are valid
    Removed,
}

pub struct ContainerTarget {
    runtime: String,
    image: String,
    init_command: Vec<String>,
    readiness_delay: Duration,
    stop_grace_secs: u64,
    name: String,
    state: ContainerState,
    transcript: Mutex<Transcript>,
}

impl ContainerTarget {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            runtime: config.container_runtime.clone(),
            image: config.image.clone(),
            init_command: config
                .init_command
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            readiness_delay: Duration::from_secs(config.readiness_delay_secs),
            stop_grace_secs: config.stop_grace_secs,
            name: format!("install-harness-{}-{}", std::process::id(), epoch_millis()),
            state: ContainerState::Idle,
            transcript: Mutex::new(Transcript::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &ContainerState {
        &self.state
    }

    fn container_id(&self) -> Option<&str> {
        match &self.state {
            ContainerState::Created { id } | ContainerState::Running { id } => Some(id),
            ContainerState::Idle | ContainerState::Removed => None,
        }
    }

    /// Run the runtime CLI itself (not a command inside the container)
    async fn runtime(&self, args: &[&str], timeout: Duration) -> Result<ProcessOutput> {
        let label = format!("{} {}", self.runtime, args.join(" "));
        let mut cmd = Command::new(&self.runtime);
        cmd.args(args);
        run_process(cmd, &label, timeout).await
    }

    /// Pull the image unless a copy with this tag is already present
    async fn ensure_image(&self) -> Result<()> {
        let inspect = self
            .runtime(&["image", "inspect", self.image.as_str()], CONTROL_TIMEOUT)
            .await
            .map_err(|e| Error::EnvironmentUnavailable(e.to_string()))?;
        if inspect.exit_code == 0 {
            debug!(image = %self.image, "image already present");
            return Ok(());
        }

        info!(image = %self.image, "pulling image");
        let pull = self
            .runtime(&["pull", self.image.as_str()], PULL_TIMEOUT)
            .await
            .map_err(|e| Error::EnvironmentUnavailable(e.to_string()))?;
        if pull.exit_code != 0 {
            return Err(Error::EnvironmentUnavailable(format!(
                "Failed to pull image '{}': {}",
                self.image,
                pull.stderr.trim()
            )));
        }
        Ok(())
    }

    async fn create(&self) -> Result<String> {
        let mut args = vec![
            "create",
            "--privileged",
            "--cgroupns=host",
            "-v",
            "/sys/fs/cgroup:/sys/fs/cgroup:rw",
            "--tmpfs",
            "/run",
            "--tmpfs",
            "/run/lock",
            "--name",
            self.name.as_str(),
            "--hostname",
            "install-harness",
            self.image.as_str(),
        ];
        args.extend(self.init_command.iter().map(String::as_str));

        let out = self
            .runtime(&args, CONTROL_TIMEOUT)
            .await
            .map_err(|e| Error::EnvironmentUnavailable(e.to_string()))?;
        if out.exit_code != 0 {
            return Err(Error::EnvironmentUnavailable(format!(
                "Failed to create container from '{}': {}",
                self.image,
                out.stderr.trim()
            )));
        }

        let id = out.stdout.trim().to_string();
        if id.is_empty() {
            return Err(Error::EnvironmentUnavailable(
                "Container runtime returned no container id".to_string(),
            ));
        }
        Ok(id)
    }

    /// `rm -f`, reporting failure as a message
    async fn force_remove(&self, id: &str) -> std::result::Result<(), String> {
        match self.runtime(&["rm", "-f", "-v", id], CONTROL_TIMEOUT).await {
            Ok(out) if out.exit_code == 0 => Ok(()),
            Ok(out) => Err(format!("rm -f {} failed: {}", id, out.stderr.trim())),
            Err(e) => Err(e.to_string()),
        }
    }

    fn record(&self, command: &str, exit_code: Option<i32>, output: &str) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.record(command, output, exit_code);
        }
    }
}

/// Classify the runtime's own stderr after `exec`
///
/// The inner shell writes everything to stdout, so a runtime message paired
/// with 125, or with 126/127 and no inner output, means the shell never ran.
fn interpret_exec(command: &str, out: ProcessOutput) -> Result<ExecOutput> {
    if let Some(msg) = out.wrapper_message() {
        let not_launched = out.exit_code == 125
            || (RUNTIME_LAUNCH_CODES.contains(&out.exit_code) && out.stdout.trim().is_empty());
        if not_launched || DISPATCH_ERROR_MARKERS.iter().any(|m| msg.contains(m)) {
            return Err(Error::dispatch(command, msg));
        }
        debug!(command, message = msg, "runtime printed to stderr");
    }
    Ok(out.into_exec_output())
}

#[async_trait]
impl ExecutionTarget for ContainerTarget {
    fn mode(&self) -> TargetMode {
        TargetMode::Container
    }

    async fn start(&mut self) -> Result<()> {
        if self.state != ContainerState::Idle {
            return Err(Error::EnvironmentUnavailable(
                "Container target has already been started".to_string(),
            ));
        }

        which::which(&self.runtime).map_err(|_| {
            Error::EnvironmentUnavailable(format!(
                "Container runtime '{}' not found in PATH",
                self.runtime
            ))
        })?;

        self.ensure_image().await?;

        let id = self.create().await?;
        self.state = ContainerState::Created { id: id.clone() };
        info!(container = %self.name, id = %id, "container created");

        let started = self.runtime(&["start", id.as_str()], CONTROL_TIMEOUT).await;
        let failure = match started {
            Ok(out) if out.exit_code == 0 => None,
            Ok(out) => Some(out.stderr.trim().to_string()),
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            if let Err(e) = self.force_remove(&id).await {
                warn!(id = %id, "failed to remove container after start failure: {}", e);
            }
            self.state = ContainerState::Removed;
            return Err(Error::EnvironmentUnavailable(format!(
                "Failed to start container: {}",
                reason
            )));
        }

        // Give the init system time to come up before the first exec
        tokio::time::sleep(self.readiness_delay).await;

        self.state = ContainerState::Running { id };
        info!(container = %self.name, image = %self.image, "container running");
        Ok(())
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        let id = match &self.state {
            ContainerState::Running { id } => id.as_str(),
            _ => {
                self.record(command, None, "");
                return Err(Error::TargetClosed);
            }
        };

        debug!(command, "exec in container");
        let mut cmd = Command::new(&self.runtime);
        cmd.args(["exec", id, "sh", "-c"])
            .arg(combined_script(command));

        let result = run_process(cmd, command, timeout)
            .await
            .and_then(|out| interpret_exec(command, out));

        match &result {
            Ok(out) => self.record(command, Some(out.exit_code), &out.output),
            Err(e) => self.record(command, None, &e.to_string()),
        }
        result
    }

    async fn cleanup(&mut self) -> Result<()> {
        let Some(id) = self.container_id().map(str::to_string) else {
            self.state = ContainerState::Removed;
            return Ok(());
        };

        let mut failures = Vec::new();

        let grace = self.stop_grace_secs.to_string();
        let stop_timeout = Duration::from_secs(self.stop_grace_secs) + CONTROL_TIMEOUT;
        match self.runtime(&["stop", "-t", grace.as_str(), id.as_str()], stop_timeout).await {
            Ok(out) if out.exit_code == 0 => debug!(id = %id, "container stopped"),
            Ok(out) => failures.push(format!("stop failed: {}", out.stderr.trim())),
            Err(e) => failures.push(format!("stop failed: {}", e)),
        }

        // Removal runs regardless of how stop went
        if let Err(e) = self.force_remove(&id).await {
            failures.push(e);
        }

        self.state = ContainerState::Removed;

        if failures.is_empty() {
            info!(container = %self.name, "container removed");
            Ok(())
        } else {
            Err(Error::CleanupFailure(failures.join("; ")))
        }
    }

    async fn logs(&self, lines: usize) -> Result<String> {
        let Some(id) = self.container_id() else {
            let transcript = self
                .transcript
                .lock()
                .map_err(|_| Error::Internal("transcript lock poisoned".to_string()))?;
            return Ok(transcript.tail(lines));
        };

        let tail = lines.to_string();
        let out = self
            .runtime(&["logs", "--tail", tail.as_str(), id], CONTROL_TIMEOUT)
            .await?;
        let mut text = out.stdout;
        if !out.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&out.stderr);
        }
        Ok(text)
    }

    async fn os_info(&self) -> Result<String> {
        let out = self.exec("cat /etc/os-release", OS_INFO_TIMEOUT).await?;
        if !out.success() {
            return Err(Error::assertion(format!(
                "Could not read /etc/os-release in container: {}",
                out.trimmed()
            )));
        }
        Ok(out.output)
    }
}
