//! Scripted in-memory target
//!
//! Answers commands from a table of substring rules instead of running them,
//! and keeps the full dispatch history. Clones share state, so a test can
//! keep a handle while the orchestrator owns the boxed target.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::exec::ExecOutput;
use super::{ExecutionTarget, TargetMode};
use crate::common::{Error, Result};

/// Scripted reply for a matching command
#[derive(Debug, Clone)]
pub enum MockReply {
    Output(ExecOutput),
    /// Exit 0, printing the command itself
    Echo,
    DispatchFailure(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MockState {
    Idle,
    Running,
    Closed,
}

#[derive(Debug)]
struct MockInner {
    os_report: String,
    rules: Vec<(String, MockReply)>,
    history: Vec<String>,
    state: MockState,
    starts: usize,
    cleanups: usize,
    fail_start: bool,
    fail_cleanup: bool,
}

#[derive(Debug, Clone)]
pub struct MockTarget {
    inner: Arc<Mutex<MockInner>>,
}

fn lock(inner: &Mutex<MockInner>) -> MutexGuard<'_, MockInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTarget {
    /// Mock whose `os_info` returns `os_report`; unmatched commands exit 0
    pub fn new(os_report: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                os_report: os_report.to_string(),
                rules: Vec::new(),
                history: Vec::new(),
                state: MockState::Idle,
                starts: 0,
                cleanups: 0,
                fail_start: false,
                fail_cleanup: false,
            })),
        }
    }

    pub fn debian() -> Self {
        Self::new("PRETTY_NAME=\"Debian GNU/Linux 12 (bookworm)\"\nID=debian\n")
    }

    pub fn rocky() -> Self {
        Self::new("NAME=\"Rocky Linux\"\nID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n")
    }

    /// Reply to commands containing `pattern`; later rules win
    pub fn respond(self, pattern: &str, output: &str, exit_code: i32) -> Self {
        lock(&self.inner).rules.push((
            pattern.to_string(),
            MockReply::Output(ExecOutput::new(output, exit_code)),
        ));
        self
    }

    /// Echo commands containing `pattern` back as their output
    pub fn echo(self, pattern: &str) -> Self {
        lock(&self.inner)
            .rules
            .push((pattern.to_string(), MockReply::Echo));
        self
    }

    /// Fail to dispatch commands containing `pattern`
    pub fn fail_dispatch(self, pattern: &str, reason: &str) -> Self {
        lock(&self.inner).rules.push((
            pattern.to_string(),
            MockReply::DispatchFailure(reason.to_string()),
        ));
        self
    }

    pub fn failing_start(self) -> Self {
        lock(&self.inner).fail_start = true;
        self
    }

    pub fn failing_cleanup(self) -> Self {
        lock(&self.inner).fail_cleanup = true;
        self
    }

    /// Every command dispatched so far, in order
    pub fn history(&self) -> Vec<String> {
        lock(&self.inner).history.clone()
    }

    /// Number of dispatched commands containing `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        lock(&self.inner)
            .history
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    /// Index of the first dispatched command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        lock(&self.inner)
            .history
            .iter()
            .position(|c| c.contains(pattern))
    }

    pub fn starts(&self) -> usize {
        lock(&self.inner).starts
    }

    pub fn cleanups(&self) -> usize {
        lock(&self.inner).cleanups
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner).state == MockState::Running
    }

    fn reply_for(inner: &MockInner, command: &str) -> MockReply {
        inner
            .rules
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or_else(|| MockReply::Output(ExecOutput::new("", 0)))
    }
}

#[async_trait]
impl ExecutionTarget for MockTarget {
    fn mode(&self) -> TargetMode {
        TargetMode::Container
    }

    async fn start(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.starts += 1;
        if inner.state != MockState::Idle {
            return Err(Error::EnvironmentUnavailable(
                "Mock target has already been started".to_string(),
            ));
        }
        if inner.fail_start {
            return Err(Error::EnvironmentUnavailable(
                "mock start failure".to_string(),
            ));
        }
        inner.state = MockState::Running;
        Ok(())
    }

    async fn exec(&self, command: &str, _timeout: Duration) -> Result<ExecOutput> {
        let mut inner = lock(&self.inner);
        if inner.state != MockState::Running {
            return Err(Error::TargetClosed);
        }
        inner.history.push(command.to_string());
        match Self::reply_for(&inner, command) {
            MockReply::Output(out) => Ok(out),
            MockReply::Echo => Ok(ExecOutput::new(format!("{}\n", command), 0)),
            MockReply::DispatchFailure(reason) => Err(Error::dispatch(command, reason)),
        }
    }

    async fn cleanup(&mut self) -> Result<()> {
        let mut inner = lock(&self.inner);
        inner.cleanups += 1;
        inner.state = MockState::Closed;
        if inner.fail_cleanup {
            return Err(Error::CleanupFailure("mock cleanup failure".to_string()));
        }
        Ok(())
    }

    async fn logs(&self, lines: usize) -> Result<String> {
        let inner = lock(&self.inner);
        let skip = inner.history.len().saturating_sub(lines);
        Ok(inner.history[skip..].join("\n"))
    }

    async fn os_info(&self) -> Result<String> {
        let inner = lock(&self.inner);
        if inner.state != MockState::Running {
            return Err(Error::TargetClosed);
        }
        Ok(inner.os_report.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_secs(1);

    #[tokio::test]
    async fn test_later_rules_win() {
        let mut target = MockTarget::debian()
            .respond("systemctl", "inactive", 3)
            .respond("systemctl is-active", "active", 0);
        target.start().await.unwrap();
        let out = target.exec("systemctl is-active x", T).await.unwrap();
        assert_eq!(out, ExecOutput::new("active", 0));
        let out = target.exec("systemctl status x", T).await.unwrap();
        assert_eq!(out.exit_code, 3);
    }

    #[tokio::test]
    async fn test_clones_share_history() {
        let handle = MockTarget::debian();
        let mut target: Box<dyn ExecutionTarget> = Box::new(handle.clone());
        target.start().await.unwrap();
        target.exec("echo hi", T).await.unwrap();
        target.cleanup().await.unwrap();
        assert_eq!(handle.history(), vec!["echo hi".to_string()]);
        assert_eq!(handle.cleanups(), 1);
        assert!(!handle.is_running());
    }
}
