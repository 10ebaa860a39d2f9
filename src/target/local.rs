//! Local host target
//!
//! Runs commands directly on the invoking host. Installation commands need
//! root, so unless the harness already runs as root every command goes
//! through `sudo -n`; a host without passwordless sudo cannot be used.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::exec::{combined_script, run_process, ExecOutput, ProcessOutput};
use super::transcript::Transcript;
use super::{ExecutionTarget, OsFamily, TargetMode};
use crate::common::config::TargetConfig;
use crate::common::{epoch_millis, paths, Error, Result};

const PRIVILEGE_TIMEOUT: Duration = Duration::from_secs(10);
const BASELINE_TIMEOUT: Duration = Duration::from_secs(600);

/// Messages sudo prints when it refuses to run the command
const SUDO_REFUSALS: &[&str] = &[
    "a password is required",
    "a terminal is required",
    "command not found",
    "is not in the sudoers file",
    "is not allowed to execute",
    "not allowed to run sudo",
];

/// System package managers the local target can bootstrap with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Dnf,
    Yum,
}

impl PackageManager {
    /// Detect the host package manager, preferring dnf over yum
    pub fn detect() -> Option<PackageManager> {
        if which::which("apt-get").is_ok() {
            Some(PackageManager::Apt)
        } else if which::which("dnf").is_ok() {
            Some(PackageManager::Dnf)
        } else if which::which("yum").is_ok() {
            Some(PackageManager::Yum)
        } else {
            None
        }
    }

    pub fn family(&self) -> OsFamily {
        match self {
            PackageManager::Apt => OsFamily::Debian,
            PackageManager::Dnf | PackageManager::Yum => OsFamily::Rhel,
        }
    }

    /// Commands installing the minimal toolset the checks rely on
    pub fn baseline_commands(&self) -> Vec<String> {
        match self {
            PackageManager::Apt => vec![
                "apt-get update".to_string(),
                "DEBIAN_FRONTEND=noninteractive apt-get install -y curl procps".to_string(),
            ],
            PackageManager::Dnf => vec!["dnf install -y curl procps-ng".to_string()],
            PackageManager::Yum => vec!["yum install -y curl procps-ng".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalState {
    Idle,
    Ready,
    Closed,
}

pub struct LocalTarget {
    elevate: bool,
    install_baseline: bool,
    use_sudo: bool,
    package_manager: Option<PackageManager>,
    state: LocalState,
    transcript: Mutex<Transcript>,
    transcript_dir: Option<PathBuf>,
}

impl LocalTarget {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            elevate: config.elevate,
            install_baseline: config.install_baseline,
            use_sudo: false,
            package_manager: None,
            state: LocalState::Idle,
            transcript: Mutex::new(Transcript::default()),
            transcript_dir: config.transcript_dir.clone().or_else(paths::log_dir),
        }
    }

    fn record(&self, command: &str, exit_code: Option<i32>, output: &str) {
        if let Ok(mut transcript) = self.transcript.lock() {
            transcript.record(command, output, exit_code);
        }
    }

    fn flush_transcript(&self) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.transcript_dir else {
            return Ok(None);
        };
        let transcript = self
            .transcript
            .lock()
            .map_err(|_| Error::Internal("transcript lock poisoned".to_string()))?;
        if transcript.is_empty() {
            return Ok(None);
        }
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("local-{}.log", epoch_millis()));
        std::fs::write(&path, transcript.to_text())?;
        Ok(Some(path))
    }
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

/// Verify the host can run commands with root privileges
///
/// Returns a short description of how commands will be run.
pub async fn check_privilege(elevate: bool) -> Result<String> {
    if !elevate {
        return Ok("without elevation".to_string());
    }
    if is_root() {
        return Ok("as root".to_string());
    }

    let mut cmd = Command::new("sudo");
    cmd.args(["-n", "true"]);
    let out = run_process(cmd, "sudo -n true", PRIVILEGE_TIMEOUT)
        .await
        .map_err(|e| Error::EnvironmentUnavailable(format!("sudo is not usable: {}", e)))?;
    if out.exit_code != 0 {
        return Err(Error::EnvironmentUnavailable(format!(
            "Passwordless sudo is required for local mode: {}",
            out.stderr.trim()
        )));
    }
    Ok("through sudo -n".to_string())
}

/// A refusal from sudo means the command never ran
///
/// Other sudo messages, such as hostname resolution warnings, are printed
/// for commands that did run and leave the result untouched.
fn interpret_exec(command: &str, out: ProcessOutput, use_sudo: bool) -> Result<ExecOutput> {
    if use_sudo && out.exit_code != 0 {
        if let Some(msg) = out.wrapper_message() {
            let refused = msg
                .lines()
                .filter(|line| line.starts_with("sudo:"))
                .any(|line| SUDO_REFUSALS.iter().any(|r| line.contains(r)));
            if refused {
                return Err(Error::dispatch(command, msg));
            }
        }
    }
    if let Some(msg) = out.wrapper_message() {
        debug!(command, message = msg, "sudo printed to stderr");
    }
    Ok(out.into_exec_output())
}

#[async_trait]
impl ExecutionTarget for LocalTarget {
    fn mode(&self) -> TargetMode {
        TargetMode::Local
    }

    async fn start(&mut self) -> Result<()> {
        if self.state != LocalState::Idle {
            return Err(Error::EnvironmentUnavailable(
                "Local target has already been started".to_string(),
            ));
        }

        let how = check_privilege(self.elevate).await?;
        self.use_sudo = self.elevate && !is_root();
        self.package_manager = PackageManager::detect();
        info!(
            package_manager = ?self.package_manager,
            "local commands run {}", how
        );

        self.state = LocalState::Ready;

        if self.install_baseline {
            let Some(pm) = self.package_manager else {
                self.state = LocalState::Idle;
                return Err(Error::EnvironmentUnavailable(
                    "No supported package manager (apt-get, dnf, yum) found".to_string(),
                ));
            };
            for command in pm.baseline_commands() {
                let failure = match self.exec(&command, BASELINE_TIMEOUT).await {
                    Ok(out) if out.success() => None,
                    Ok(out) => Some(format!("exit {}: {}", out.exit_code, out.trimmed())),
                    Err(e) => Some(e.to_string()),
                };
                if let Some(reason) = failure {
                    self.state = LocalState::Idle;
                    return Err(Error::EnvironmentUnavailable(format!(
                        "Baseline install '{}' failed: {}",
                        command, reason
                    )));
                }
            }
        }

        Ok(())
    }

    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        if self.state != LocalState::Ready {
            self.record(command, None, "");
            return Err(Error::TargetClosed);
        }

        debug!(command, sudo = self.use_sudo, "exec on local host");
        let script = combined_script(command);
        let mut cmd = if self.use_sudo {
            let mut cmd = Command::new("sudo");
            cmd.args(["-n", "sh", "-c"]).arg(script);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(script);
            cmd
        };
        // Keep the host's locale out of the substring checks
        cmd.env("LC_ALL", "C");

        let result = run_process(cmd, command, timeout)
            .await
            .and_then(|out| interpret_exec(command, out, self.use_sudo));

        match &result {
            Ok(out) => self.record(command, Some(out.exit_code), &out.output),
            Err(e) => self.record(command, None, &e.to_string()),
        }
        result
    }

    async fn cleanup(&mut self) -> Result<()> {
        self.state = LocalState::Closed;
        match self.flush_transcript() {
            Ok(Some(path)) => {
                info!("local transcript written to {}", path.display());
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(Error::CleanupFailure(format!(
                "could not write transcript: {}",
                e
            ))),
        }
    }

    async fn logs(&self, lines: usize) -> Result<String> {
        let transcript = self
            .transcript
            .lock()
            .map_err(|_| Error::Internal("transcript lock poisoned".to_string()))?;
        Ok(transcript.tail(lines))
    }

    async fn os_info(&self) -> Result<String> {
        if self.state != LocalState::Ready {
            return Err(Error::TargetClosed);
        }
        let info = os_info::get();
        let mut report = format!("{} {}", info.os_type(), info.version());
        if let Ok(os_release) = std::fs::read_to_string("/etc/os-release") {
            report.push('\n');
            report.push_str(&os_release);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unprivileged(dir: Option<PathBuf>) -> LocalTarget {
        let config = TargetConfig {
            elevate: false,
            install_baseline: false,
            transcript_dir: dir,
            ..TargetConfig::default()
        };
        LocalTarget::new(&config)
    }

    fn process(stdout: &str, stderr: &str, exit_code: i32) -> ProcessOutput {
        ProcessOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code,
        }
    }

    #[test]
    fn test_sudo_refusal_is_dispatch_failure() {
        let out = process("", "sudo: a password is required", 1);
        let err = interpret_exec("apt-get update", out, true).unwrap_err();
        assert!(matches!(err, Error::DispatchFailure { .. }));
    }

    #[test]
    fn test_sudo_warning_keeps_command_result() {
        let warning = "sudo: unable to resolve host box: Name or service not known";
        let out = process("hello\n", warning, 0);
        let result = interpret_exec("echo hello", out, true).unwrap();
        assert_eq!(result, ExecOutput::new("hello\n", 0));

        let out = process("", warning, 1);
        let result = interpret_exec("false", out, true).unwrap();
        assert_eq!(result.exit_code, 1);
    }

    #[test]
    fn test_stderr_ignored_without_sudo() {
        let out = process("", "sudo: a password is required", 1);
        assert!(interpret_exec("true", out, false).is_ok());
    }

    #[tokio::test]
    async fn test_exit_code_reported_without_error() {
        let mut target = unprivileged(None);
        target.start().await.unwrap();
        let out = target.exec("exit 3", Duration::from_secs(5)).await.unwrap();
        assert_eq!(out, ExecOutput::new("", 3));
    }

    #[tokio::test]
    async fn test_exec_after_cleanup_is_rejected() {
        let mut target = unprivileged(None);
        target.start().await.unwrap();
        target.cleanup().await.unwrap();
        let err = target
            .exec("true", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TargetClosed));
    }

    #[tokio::test]
    async fn test_logs_return_transcript_window() {
        let mut target = unprivileged(None);
        target.start().await.unwrap();
        target
            .exec("echo first", Duration::from_secs(5))
            .await
            .unwrap();
        target
            .exec("echo second", Duration::from_secs(5))
            .await
            .unwrap();
        let logs = target.logs(3).await.unwrap();
        assert_eq!(logs, "$ echo second\nsecond\n[exit 0]");
    }

    #[tokio::test]
    async fn test_cleanup_flushes_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut target = unprivileged(Some(dir.path().to_path_buf()));
        target.start().await.unwrap();
        target
            .exec("echo flushed", Duration::from_secs(5))
            .await
            .unwrap();
        target.cleanup().await.unwrap();

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(files.len(), 1);
        let path = files[0].as_ref().unwrap().path();
        assert!(std::fs::read_to_string(path).unwrap().contains("flushed"));
    }

    #[tokio::test]
    async fn test_os_info_follows_lifecycle() {
        let mut target = unprivileged(None);
        assert!(matches!(target.os_info().await, Err(Error::TargetClosed)));
        target.start().await.unwrap();
        assert!(target.os_info().await.is_ok());
        target.cleanup().await.unwrap();
        assert!(matches!(target.os_info().await, Err(Error::TargetClosed)));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let mut target = unprivileged(None);
        target.start().await.unwrap();
        assert!(target.start().await.unwrap_err().is_fatal_to_suite());
    }

    #[test]
    fn test_package_manager_family() {
        assert_eq!(PackageManager::Apt.family(), OsFamily::Debian);
        assert_eq!(PackageManager::Dnf.family(), OsFamily::Rhel);
        assert!(PackageManager::Apt.baseline_commands()[0].contains("update"));
    }
}
