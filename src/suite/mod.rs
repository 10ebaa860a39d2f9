//! Installation test suite
//!
//! A suite is a fixed, ordered list of test cases run against one execution
//! target. Test cases never call each other: each one demands the
//! installation phases it depends on through the shared [`InstallState`],
//! so it can also run on its own.

pub mod cases;
pub mod registry;
pub mod runner;

use std::time::Duration;

use async_trait::async_trait;

use crate::common::{shell_quote, Error, Result, SuiteConfig};
use crate::install::{InstallPlan, InstallState, Phase};
use crate::target::{ExecOutput, ExecutionTarget, OsFamily};

pub use registry::{all_cases, find_case};
pub use runner::{Orchestrator, RunOptions};

/// One independently runnable validation scenario
#[async_trait]
pub trait TestCase: Send + Sync {
    /// Stable identifier used by `--only`
    fn name(&self) -> &'static str;

    /// One-line summary for `list`
    fn description(&self) -> &'static str;

    /// `Err(Error::Skipped)` records a skip instead of a failure
    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()>;
}

/// Owner and permission bits of a path, as reported by `stat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// Octal permission bits, e.g. `"755"`
    pub mode: String,
    /// `user:group`
    pub owner: String,
}

/// Everything a test case may touch
///
/// The target is borrowed shared, so a test case can run commands but
/// cannot start or clean up the target.
pub struct TestContext<'a> {
    target: &'a dyn ExecutionTarget,
    state: &'a mut InstallState,
    config: &'a SuiteConfig,
}

impl<'a> TestContext<'a> {
    pub fn new(
        target: &'a dyn ExecutionTarget,
        state: &'a mut InstallState,
        config: &'a SuiteConfig,
    ) -> Self {
        Self {
            target,
            state,
            config,
        }
    }

    pub fn config(&self) -> &SuiteConfig {
        self.config
    }

    pub fn target(&self) -> &dyn ExecutionTarget {
        self.target
    }

    /// Make sure `phase` and everything before it is installed
    pub async fn ensure(&mut self, phase: Phase) -> Result<()> {
        self.state.ensure(phase, self.target).await
    }

    pub async fn family(&mut self) -> Result<OsFamily> {
        self.state.detect_family(self.target).await
    }

    /// Command plan for the target's OS family
    pub async fn plan(&mut self) -> Result<InstallPlan<'a>> {
        let family = self.family().await?;
        Ok(InstallPlan::new(self.config, family))
    }

    /// Run a command with the default deadline
    pub async fn exec(&self, command: &str) -> Result<ExecOutput> {
        self.exec_with_timeout(command, self.config.timeouts.exec())
            .await
    }

    pub async fn exec_with_timeout(&self, command: &str, timeout: Duration) -> Result<ExecOutput> {
        self.target.exec(command, timeout).await
    }

    /// Run a command that must exit 0
    pub async fn expect_success(&self, command: &str) -> Result<ExecOutput> {
        self.exec(command).await?.expect_exit(command, &[0])
    }

    /// Run a command whose exit code must be one of `allowed`
    pub async fn expect_exit(&self, command: &str, allowed: &[i32]) -> Result<ExecOutput> {
        self.exec(command).await?.expect_exit(command, allowed)
    }

    /// Run a command that must exit 0 and print `needle`
    pub async fn expect_output(&self, command: &str, needle: &str) -> Result<ExecOutput> {
        self.expect_success(command)
            .await?
            .expect_contains(command, needle)
    }

    pub async fn assert_file_exists(&self, path: &str) -> Result<()> {
        let command = format!("test -f {} && echo exists", shell_quote(path));
        self.expect_output(&command, "exists").await.map(|_| ())
    }

    pub async fn assert_executable(&self, path: &str) -> Result<()> {
        let command = format!("test -x {} && echo exists", shell_quote(path));
        self.expect_output(&command, "exists").await.map(|_| ())
    }

    pub async fn assert_dir_exists(&self, path: &str) -> Result<()> {
        let command = format!("test -d {} && echo exists", shell_quote(path));
        self.expect_output(&command, "exists").await.map(|_| ())
    }

    /// Permission bits and ownership of `path`
    pub async fn stat(&self, path: &str) -> Result<FileStat> {
        let command = format!("stat -c '%a %U:%G' {}", shell_quote(path));
        let out = self.expect_success(&command).await?;
        parse_stat(out.trimmed()).ok_or_else(|| {
            Error::assertion(format!(
                "Unexpected stat output for {}: '{}'",
                path,
                out.trimmed()
            ))
        })
    }
}

fn parse_stat(line: &str) -> Option<FileStat> {
    let (mode, owner) = line.split_once(' ')?;
    if mode.is_empty() || !mode.chars().all(|c| c.is_ascii_digit()) || !owner.contains(':') {
        return None;
    }
    Some(FileStat {
        mode: mode.to_string(),
        owner: owner.trim().to_string(),
    })
}
