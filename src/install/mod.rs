//! Installation state cache
//!
//! Installation is split into coarse phases that form a single dependency
//! chain. A test case demands the phase it needs; the cache runs every
//! missing phase up to it, in order, and remembers what already succeeded
//! so the expensive commands run at most once per suite run.
//!
//! A phase is marked done only after all of its commands exit 0. A failed
//! phase stays pending, so a later test case may try it again.

pub mod plan;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::common::{Error, Result, SuiteConfig};
use crate::target::{ExecutionTarget, OsFamily};

pub use plan::InstallPlan;

/// Memoized unit of installation work, in dependency order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Repository,
    DatabaseEngine,
    ApplicationPackages,
    Configuration,
    ServiceRunning,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Repository,
        Phase::DatabaseEngine,
        Phase::ApplicationPackages,
        Phase::Configuration,
        Phase::ServiceRunning,
    ];

    /// This phase and all of its prerequisites, root first
    pub fn chain(self) -> &'static [Phase] {
        &Self::ALL[..=self.index()]
    }

    fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Repository => "repository",
            Phase::DatabaseEngine => "database-engine",
            Phase::ApplicationPackages => "application-packages",
            Phase::Configuration => "configuration",
            Phase::ServiceRunning => "service-running",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-run memo of completed phases
///
/// Owned by the orchestrator and lent to test cases; a new suite run starts
/// with a new cache, so nothing carries over between targets.
#[derive(Debug)]
pub struct InstallState {
    config: SuiteConfig,
    done: BTreeMap<Phase, bool>,
    family: Option<OsFamily>,
}

impl InstallState {
    pub fn new(config: &SuiteConfig) -> Self {
        Self {
            config: config.clone(),
            done: Phase::ALL.iter().map(|&p| (p, false)).collect(),
            family: None,
        }
    }

    pub fn is_done(&self, phase: Phase) -> bool {
        self.done.get(&phase).copied().unwrap_or(false)
    }

    /// Snapshot of every phase flag
    pub fn phases(&self) -> BTreeMap<Phase, bool> {
        self.done.clone()
    }

    /// OS family, once detected
    pub fn family(&self) -> Option<OsFamily> {
        self.family
    }

    pub async fn ensure_repository_installed(&mut self, target: &dyn ExecutionTarget) -> Result<()> {
        self.ensure(Phase::Repository, target).await
    }

    pub async fn ensure_database_engine_installed(
        &mut self,
        target: &dyn ExecutionTarget,
    ) -> Result<()> {
        self.ensure(Phase::DatabaseEngine, target).await
    }

    pub async fn ensure_application_packages_installed(
        &mut self,
        target: &dyn ExecutionTarget,
    ) -> Result<()> {
        self.ensure(Phase::ApplicationPackages, target).await
    }

    pub async fn ensure_configured(&mut self, target: &dyn ExecutionTarget) -> Result<()> {
        self.ensure(Phase::Configuration, target).await
    }

    pub async fn ensure_service_running(&mut self, target: &dyn ExecutionTarget) -> Result<()> {
        self.ensure(Phase::ServiceRunning, target).await
    }

    /// Run every pending phase up to and including `phase`
    pub async fn ensure(&mut self, phase: Phase, target: &dyn ExecutionTarget) -> Result<()> {
        for &step in phase.chain() {
            if self.is_done(step) {
                debug!(phase = %step, "phase already done");
                continue;
            }
            let family = self.detect_family(target).await?;
            self.run_phase(step, family, target).await?;
            self.done.insert(step, true);
            info!(phase = %step, "phase complete");
        }
        Ok(())
    }

    /// Detect the OS family once per run
    pub async fn detect_family(&mut self, target: &dyn ExecutionTarget) -> Result<OsFamily> {
        if let Some(family) = self.family {
            return Ok(family);
        }
        let report = target.os_info().await?;
        let family = OsFamily::detect(&report).ok_or_else(|| {
            Error::assertion(format!(
                "Unsupported operating system (neither Debian nor RHEL family):\n{}",
                report.trim()
            ))
        })?;
        info!(%family, "detected target OS family");
        self.family = Some(family);
        Ok(family)
    }

    async fn run_phase(
        &self,
        phase: Phase,
        family: OsFamily,
        target: &dyn ExecutionTarget,
    ) -> Result<()> {
        info!(phase = %phase, %family, "installing phase");
        let commands = InstallPlan::new(&self.config, family).commands(phase)?;
        let timeout = self.config.timeouts.install();

        for command in commands {
            let out = target.exec(&command, timeout).await?;
            if !out.success() {
                return Err(Error::assertion(format!(
                    "Phase '{}' failed: '{}' exited with {}:\n{}",
                    phase,
                    command,
                    out.exit_code,
                    out.trimmed()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::MockTarget;

    async fn started(mock: &MockTarget) -> Box<dyn ExecutionTarget> {
        let mut target: Box<dyn ExecutionTarget> = Box::new(mock.clone());
        target.start().await.unwrap();
        target
    }

    #[test]
    fn test_phase_chain() {
        assert_eq!(Phase::Repository.chain(), &[Phase::Repository]);
        assert_eq!(
            Phase::ApplicationPackages.chain(),
            &[
                Phase::Repository,
                Phase::DatabaseEngine,
                Phase::ApplicationPackages
            ]
        );
        assert_eq!(Phase::ServiceRunning.chain(), &Phase::ALL);
    }

    #[tokio::test]
    async fn test_second_ensure_dispatches_nothing() {
        let mock = MockTarget::debian();
        let target = started(&mock).await;
        let mut state = InstallState::new(&SuiteConfig::default());

        state
            .ensure_application_packages_installed(target.as_ref())
            .await
            .unwrap();
        let after_first = mock.history().len();
        assert!(after_first > 0);

        state
            .ensure_application_packages_installed(target.as_ref())
            .await
            .unwrap();
        assert_eq!(mock.history().len(), after_first);
    }

    #[tokio::test]
    async fn test_database_engine_installs_repository_first() {
        let mock = MockTarget::debian();
        let target = started(&mock).await;
        let mut state = InstallState::new(&SuiteConfig::default());

        state
            .ensure_database_engine_installed(target.as_ref())
            .await
            .unwrap();

        assert!(state.is_done(Phase::Repository));
        assert!(state.is_done(Phase::DatabaseEngine));
        assert!(!state.is_done(Phase::ApplicationPackages));
        let repo = mock.position("pgedge-release").unwrap();
        let db = mock.position("postgresql-17").unwrap();
        assert!(repo < db);
    }

    #[tokio::test]
    async fn test_failed_phase_stays_pending() {
        let mock = MockTarget::debian().respond("postgresql-17", "E: Unable to locate package", 100);
        let target = started(&mock).await;
        let mut state = InstallState::new(&SuiteConfig::default());

        let err = state
            .ensure_database_engine_installed(target.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Assertion(_)));
        assert!(state.is_done(Phase::Repository));
        assert!(!state.is_done(Phase::DatabaseEngine));
    }

    #[tokio::test]
    async fn test_dispatch_failure_propagates() {
        let mock = MockTarget::rocky().fail_dispatch("dnf -y makecache", "broken pipe");
        let target = started(&mock).await;
        let mut state = InstallState::new(&SuiteConfig::default());

        let err = state
            .ensure_repository_installed(target.as_ref())
            .await
            .unwrap_err();
        assert!(err.is_dispatch_failure());
        assert!(!state.is_done(Phase::Repository));
    }

    #[tokio::test]
    async fn test_family_detected_once() {
        let mock = MockTarget::rocky();
        let target = started(&mock).await;
        let mut state = InstallState::new(&SuiteConfig::default());

        state.ensure_configured(target.as_ref()).await.unwrap();
        assert_eq!(state.family(), Some(OsFamily::Rhel));
        assert_eq!(mock.count_matching("apt-get"), 0);
        assert!(mock.count_matching("dnf install") >= 3);
    }

    #[tokio::test]
    async fn test_unknown_os_is_assertion_failure() {
        let mock = MockTarget::new("NAME=\"Alpine Linux\"");
        let target = started(&mock).await;
        let mut state = InstallState::new(&SuiteConfig::default());

        let err = state
            .ensure_repository_installed(target.as_ref())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Assertion(_)));
        assert!(mock.history().is_empty());
    }
}
