//! Test orchestrator
//!
//! Drives one suite run: start the target, run every case in declared order
//! against a fresh installation cache, record each outcome, then clean the
//! target up no matter what happened before rendering the report.

use std::collections::HashSet;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;

use colored::Colorize;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use super::{all_cases, TestCase, TestContext};
use crate::common::{Error, Result, SuiteConfig};
use crate::install::InstallState;
use crate::progress::Ticker;
use crate::report::{Reporter, SuiteReport, TestRecord, TestStatus};
use crate::target::ExecutionTarget;

/// How the final report is printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Per-case lines and a summary table
    #[default]
    Text,
    Json,
    /// Print nothing; the caller handles the report
    Quiet,
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Run only these cases; empty means all
    pub only: Vec<String>,
    pub format: OutputFormat,
    /// Draw the progress spinner when stderr is a terminal
    pub progress: bool,
}

pub struct Orchestrator {
    config: SuiteConfig,
    options: RunOptions,
    cases: Vec<Box<dyn TestCase>>,
    interrupt: Arc<Notify>,
}

impl Orchestrator {
    pub fn new(config: SuiteConfig, options: RunOptions) -> Self {
        Self {
            config,
            options,
            cases: all_cases(),
            interrupt: Arc::new(Notify::new()),
        }
    }

    /// Replace the declared cases
    pub fn with_cases(mut self, cases: Vec<Box<dyn TestCase>>) -> Self {
        self.cases = cases;
        self
    }

    /// Handle that interrupts the running case like Ctrl-C does
    pub fn interrupter(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }

    /// Names selected with `--only`, validated against the declared cases
    fn selection(&self) -> Result<Option<HashSet<&str>>> {
        if self.options.only.is_empty() {
            return Ok(None);
        }
        let known: HashSet<&str> = self.cases.iter().map(|c| c.name()).collect();
        let unknown: Vec<&str> = self
            .options
            .only
            .iter()
            .map(String::as_str)
            .filter(|name| !known.contains(name))
            .collect();
        if !unknown.is_empty() {
            return Err(Error::Config(format!(
                "Unknown test case(s): {}. Use 'install-harness list' to see available cases",
                unknown.join(", ")
            )));
        }
        Ok(Some(self.options.only.iter().map(String::as_str).collect()))
    }

    /// Run the suite against `target`
    ///
    /// `Err` only when the run could not begin: an invalid selection, or a
    /// target that failed to start (cleanup has been attempted by then).
    /// Case failures are part of the returned report.
    pub async fn run(&self, target: &mut dyn ExecutionTarget) -> Result<SuiteReport> {
        let selection = self.selection()?;

        info!(mode = %target.mode(), "suite setup");
        if let Err(e) = target.start().await {
            error!(error = %e, "target failed to start");
            if let Err(cleanup) = target.cleanup().await {
                warn!(error = %cleanup, "cleanup after failed start did not complete");
            }
            return Err(e);
        }

        let visible = self.options.progress
            && self.options.format == OutputFormat::Text
            && std::io::stderr().is_terminal();
        let ticker = Ticker::start(self.cases.len() as u64, visible);

        let mut state = InstallState::new(&self.config);
        let mut reporter = Reporter::new(target.mode());
        let mut abort_reason: Option<String> = None;

        for (index, case) in self.cases.iter().enumerate() {
            let ordinal = index + 1;
            let name = case.name();

            if let Some(selected) = &selection {
                if !selected.contains(name) {
                    reporter.record(TestRecord::skipped(ordinal, name, "not selected"));
                    ticker.inc();
                    continue;
                }
            }
            if let Some(reason) = &abort_reason {
                reporter.record(TestRecord::skipped(ordinal, name, reason.clone()));
                ticker.inc();
                continue;
            }

            ticker.set_message(name.to_string());
            info!(case = name, ordinal, "test beginning");
            let started = Instant::now();

            let outcome = {
                let mut ctx = TestContext::new(&*target, &mut state, &self.config);
                tokio::select! {
                    result = case.run(&mut ctx) => Some(result),
                    _ = tokio::signal::ctrl_c() => None,
                    _ = self.interrupt.notified() => None,
                }
            };
            let elapsed = started.elapsed();

            let record = match outcome {
                Some(Ok(())) => {
                    info!(case = name, secs = elapsed.as_secs_f64(), "test passed");
                    TestRecord::passed(ordinal, name, elapsed)
                }
                Some(Err(Error::Skipped(reason))) => {
                    info!(case = name, %reason, "test skipped");
                    TestRecord::skipped(ordinal, name, reason)
                }
                Some(Err(e)) => {
                    error!(case = name, error = %e, "test failed");
                    if e.is_fatal_to_suite() {
                        abort_reason = Some(format!("suite aborted: {}", e));
                    }
                    let logs = self.capture_logs(&*target).await;
                    ticker.suspend(|| print_failure_logs(name, &logs));
                    TestRecord::failed(ordinal, name, elapsed, e.to_string(), Some(logs))
                }
                None => {
                    warn!(case = name, "interrupted");
                    abort_reason = Some("suite interrupted".to_string());
                    TestRecord::failed(
                        ordinal,
                        name,
                        elapsed,
                        "interrupted".to_string(),
                        None,
                    )
                }
            };

            if self.options.format == OutputFormat::Text {
                ticker.suspend(|| print_case_line(&record));
            }
            reporter.record(record);
            ticker.inc();
        }

        ticker.stop().await;

        info!("suite teardown");
        let cleanup_warning = match target.cleanup().await {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "cleanup failed");
                Some(e.to_string())
            }
        };

        let report = reporter.finish(state.phases(), cleanup_warning);
        match self.options.format {
            OutputFormat::Text => println!("\n{}", report),
            OutputFormat::Json => println!("{}", report.to_json()?),
            OutputFormat::Quiet => {}
        }
        Ok(report)
    }

    async fn capture_logs(&self, target: &dyn ExecutionTarget) -> String {
        match target.logs(self.config.target.log_window_lines).await {
            Ok(logs) => logs,
            Err(e) => format!("(logs unavailable: {})", e),
        }
    }
}

fn print_case_line(record: &TestRecord) {
    let mark = match record.status {
        TestStatus::Pass => "✓".green(),
        TestStatus::Fail => "✗".red(),
        TestStatus::Skip => "-".yellow(),
    };
    println!("  {} {} ({:.2}s)", mark, record.name, record.duration_secs);
}

fn print_failure_logs(name: &str, logs: &str) {
    eprintln!("{} {}", "Recent target logs after failure of".red(), name.bold());
    for line in logs.lines() {
        eprintln!("  {}", line.dimmed());
    }
}
