//! Execution targets
//!
//! An execution target is the place where test commands run: a disposable
//! privileged container or the local host. Both variants expose the same
//! capability contract, so a test case is written once and runs unchanged
//! against either of them.

pub mod container;
pub mod exec;
pub mod local;
pub mod mock;
mod transcript;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result, SuiteConfig};

pub use container::ContainerTarget;
pub use exec::ExecOutput;
pub use local::LocalTarget;
pub use mock::MockTarget;
pub use transcript::Transcript;

/// Where commands run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    /// Disposable privileged container
    #[default]
    Container,
    /// The invoking host, through passwordless sudo
    Local,
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetMode::Container => write!(f, "container"),
            TargetMode::Local => write!(f, "local"),
        }
    }
}

/// Package-manager family of the target operating system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OsFamily {
    /// APT based: Debian, Ubuntu
    Debian,
    /// DNF/YUM based: RHEL, Rocky, Alma, CentOS, Fedora
    Rhel,
}

impl OsFamily {
    /// Classify an OS report (`/etc/os-release` content or an OS name)
    pub fn detect(report: &str) -> Option<OsFamily> {
        let report = report.to_lowercase();
        const DEBIAN: &[&str] = &["debian", "ubuntu"];
        const RHEL: &[&str] = &[
            "rhel", "red hat", "rocky", "alma", "centos", "fedora", "oracle linux",
        ];

        if DEBIAN.iter().any(|m| report.contains(m)) {
            Some(OsFamily::Debian)
        } else if RHEL.iter().any(|m| report.contains(m)) {
            Some(OsFamily::Rhel)
        } else {
            None
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsFamily::Debian => write!(f, "debian"),
            OsFamily::Rhel => write!(f, "rhel"),
        }
    }
}

/// Capability contract shared by every execution target
///
/// Lifecycle operations take `&mut self`: only the orchestrator that owns
/// the target can start or clean it up, while test cases borrow it shared
/// and can only execute commands and read logs.
#[async_trait]
pub trait ExecutionTarget: Send + Sync {
    /// Static identity of the variant
    fn mode(&self) -> TargetMode;

    /// Provision the environment
    ///
    /// Fails with [`Error::EnvironmentUnavailable`]; the failure is not retried.
    async fn start(&mut self) -> Result<()>;

    /// Run one shell command, waiting at most `timeout`
    ///
    /// A non-zero exit code is reported in [`ExecOutput::exit_code`]; `Err`
    /// means the command could not be dispatched or did not finish in time.
    async fn exec(&self, command: &str, timeout: Duration) -> Result<ExecOutput>;

    /// Release the environment. Best effort: every step is attempted even
    /// when an earlier one fails.
    async fn cleanup(&mut self) -> Result<()>;

    /// Most recent `lines` lines of target-level output, for diagnostics
    async fn logs(&self, lines: usize) -> Result<String>;

    /// Operating system report used to pick OS-specific commands
    async fn os_info(&self) -> Result<String>;
}

/// Build the target selected by the configuration
pub fn from_config(config: &SuiteConfig) -> Box<dyn ExecutionTarget> {
    match config.target.mode {
        TargetMode::Container => Box::new(ContainerTarget::new(&config.target)),
        TargetMode::Local => Box::new(LocalTarget::new(&config.target)),
    }
}

/// Check that the selected variant can be provisioned on this host
pub async fn check_prerequisites(config: &SuiteConfig) -> Result<String> {
    match config.target.mode {
        TargetMode::Container => {
            let runtime = &config.target.container_runtime;
            which::which(runtime)
                .map(|path| format!("{} found at {}", runtime, path.display()))
                .map_err(|_| {
                    Error::EnvironmentUnavailable(format!(
                        "Container runtime '{}' not found in PATH",
                        runtime
                    ))
                })
        }
        TargetMode::Local => local::check_privilege(config.target.elevate)
            .await
            .map(|how| format!("Local commands run {}", how)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_debian_family() {
        let report = "PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian";
        assert_eq!(OsFamily::detect(report), Some(OsFamily::Debian));
        assert_eq!(OsFamily::detect("Ubuntu 24.04"), Some(OsFamily::Debian));
    }

    #[test]
    fn test_detect_rhel_family() {
        assert_eq!(
            OsFamily::detect("NAME=\"Rocky Linux\"\nID_LIKE=\"rhel centos fedora\""),
            Some(OsFamily::Rhel)
        );
        assert_eq!(OsFamily::detect("AlmaLinux 9.4"), Some(OsFamily::Rhel));
    }

    #[test]
    fn test_detect_unknown_family() {
        assert_eq!(OsFamily::detect("Alpine Linux v3.20"), None);
    }

    #[test]
    fn test_target_mode_display() {
        assert_eq!(TargetMode::Container.to_string(), "container");
        assert_eq!(TargetMode::Local.to_string(), "local");
    }
}
