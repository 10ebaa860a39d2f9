//! Suite results and their rendering

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use colored::Colorize;
use serde::Serialize;

use crate::common::Result;
use crate::install::Phase;
use crate::target::TargetMode;

/// Outcome of one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

impl TestStatus {
    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Finalized record of one test case
#[derive(Debug, Clone, Serialize)]
pub struct TestRecord {
    /// 1-based position in the declared order
    pub ordinal: usize,
    pub name: String,
    pub status: TestStatus,
    pub duration_secs: f64,
    /// Failure or skip reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Target log window captured after a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
}

impl TestRecord {
    pub fn passed(ordinal: usize, name: &str, duration: Duration) -> Self {
        Self::new(ordinal, name, TestStatus::Pass, duration, None, None)
    }

    pub fn failed(
        ordinal: usize,
        name: &str,
        duration: Duration,
        detail: String,
        logs: Option<String>,
    ) -> Self {
        Self::new(ordinal, name, TestStatus::Fail, duration, Some(detail), logs)
    }

    pub fn skipped(ordinal: usize, name: &str, reason: impl Into<String>) -> Self {
        Self::new(
            ordinal,
            name,
            TestStatus::Skip,
            Duration::ZERO,
            Some(reason.into()),
            None,
        )
    }

    fn new(
        ordinal: usize,
        name: &str,
        status: TestStatus,
        duration: Duration,
        detail: Option<String>,
        logs: Option<String>,
    ) -> Self {
        Self {
            ordinal,
            name: name.to_string(),
            status,
            duration_secs: duration.as_secs_f64(),
            detail,
            logs,
        }
    }
}

/// Collects records while the suite runs
#[derive(Debug)]
pub struct Reporter {
    mode: TargetMode,
    records: Vec<TestRecord>,
}

impl Reporter {
    pub fn new(mode: TargetMode) -> Self {
        Self {
            mode,
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, record: TestRecord) {
        self.records.push(record);
    }

    pub fn finish(
        self,
        phases: BTreeMap<Phase, bool>,
        cleanup_warning: Option<String>,
    ) -> SuiteReport {
        let count = |status: TestStatus| {
            self.records
                .iter()
                .filter(|r| r.status == status)
                .count()
        };
        SuiteReport {
            mode: self.mode,
            passed: count(TestStatus::Pass),
            failed: count(TestStatus::Fail),
            skipped: count(TestStatus::Skip),
            total_secs: self.records.iter().map(|r| r.duration_secs).sum(),
            phases,
            cleanup_warning,
            records: self.records,
        }
    }
}

/// Final result of one suite run
#[derive(Debug, Clone, Serialize)]
pub struct SuiteReport {
    pub mode: TargetMode,
    pub records: Vec<TestRecord>,
    /// Installation phases completed during the run
    pub phases: BTreeMap<Phase, bool>,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_warning: Option<String>,
}

impl SuiteReport {
    /// 0 when no case failed
    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            0
        } else {
            1
        }
    }

    pub fn status_of(&self, name: &str) -> Option<TestStatus> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.status)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .records
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            .max("Test".len());

        writeln!(
            f,
            "{:>3}  {:<width$}  {:<6}  {:>9}",
            "#",
            "Test",
            "Status",
            "Duration",
            width = width
        )?;
        writeln!(f, "{}", "-".repeat(3 + 2 + width + 2 + 6 + 2 + 9))?;

        for record in &self.records {
            // Pad first: escape codes would otherwise count towards the width
            let status = format!("{:<6}", record.status.label());
            let status = match record.status {
                TestStatus::Pass => status.green(),
                TestStatus::Fail => status.red().bold(),
                TestStatus::Skip => status.yellow(),
            };
            writeln!(
                f,
                "{:>3}  {:<width$}  {}  {:>8.2}s",
                record.ordinal,
                record.name,
                status,
                record.duration_secs,
                width = width
            )?;
        }

        let failures: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.status == TestStatus::Fail)
            .collect();
        if !failures.is_empty() {
            writeln!(f, "\n{}", "Failures:".red().bold())?;
            for record in failures {
                let detail = record.detail.as_deref().unwrap_or("no detail");
                let first = detail.lines().next().unwrap_or(detail);
                writeln!(f, "  {}: {}", record.name, first)?;
            }
        }

        if let Some(warning) = &self.cleanup_warning {
            writeln!(f, "\n{} {}", "Cleanup warning:".yellow(), warning)?;
        }

        write!(
            f,
            "\n{} passed, {} failed, {} skipped ({} target, {:.1}s)",
            self.passed.to_string().green(),
            self.failed.to_string().red(),
            self.skipped.to_string().yellow(),
            self.mode,
            self.total_secs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SuiteReport {
        let mut reporter = Reporter::new(TargetMode::Container);
        reporter.record(TestRecord::passed(
            1,
            "repository_installation",
            Duration::from_millis(1500),
        ));
        reporter.record(TestRecord::failed(
            2,
            "http_endpoint",
            Duration::from_secs(3),
            "not reachable\nmore".to_string(),
            Some("log line".to_string()),
        ));
        reporter.record(TestRecord::skipped(3, "stdio_mode", "not selected"));
        let mut phases = BTreeMap::new();
        phases.insert(Phase::Repository, true);
        reporter.finish(phases, None)
    }

    #[test]
    fn test_totals_and_exit_code() {
        let report = sample();
        assert_eq!((report.passed, report.failed, report.skipped), (1, 1, 1));
        assert_eq!(report.exit_code(), 1);
        assert!((report.total_secs - 4.5).abs() < 1e-9);
    }

    #[test]
    fn test_skips_do_not_fail_the_run() {
        let mut reporter = Reporter::new(TargetMode::Local);
        reporter.record(TestRecord::skipped(1, "a", "not selected"));
        let report = reporter.finish(BTreeMap::new(), None);
        assert_eq!(report.exit_code(), 0);
    }

    #[test]
    fn test_table_lists_every_case() {
        colored::control::set_override(false);
        let table = sample().to_string();
        assert!(table.contains("repository_installation  PASS"));
        assert!(table.contains("http_endpoint            FAIL"));
        assert!(table.contains("http_endpoint: not reachable"));
        assert!(!table.contains("more"));
        assert!(table.ends_with("1 passed, 1 failed, 1 skipped (container target, 4.5s)"));
    }

    #[test]
    fn test_json_report() {
        let json: serde_json::Value = serde_json::from_str(&sample().to_json().unwrap()).unwrap();
        assert_eq!(json["mode"], "container");
        assert_eq!(json["records"][1]["status"], "fail");
        assert_eq!(json["phases"]["repository"], true);
        assert!(json["records"][0].get("detail").is_none());
    }
}
