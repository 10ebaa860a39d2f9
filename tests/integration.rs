//! Integration tests for the installation harness
//!
//! These tests drive the orchestrator end to end against the scripted
//! in-memory target, the command executor against the host `sh`, and the
//! CLI binary for the commands that need no container runtime.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use harness::install::Phase;
use harness::suite::runner::OutputFormat;
use harness::target::exec::run_shell;
use harness::{
    Error, ExecOutput, ExecutionTarget, MockTarget, Orchestrator, RunOptions, SuiteConfig,
    TestStatus,
};

fn quiet(only: &[&str]) -> RunOptions {
    RunOptions {
        only: only.iter().map(|s| s.to_string()).collect(),
        format: OutputFormat::Quiet,
        progress: false,
    }
}

/// Debian target on which every check finds what it looks for
fn healthy_debian() -> MockTarget {
    MockTarget::debian()
        .respond("test -f", "exists\n", 0)
        .respond("test -x", "exists\n", 0)
        .respond("test -d", "exists\n", 0)
        .respond("apt-cache policy", "500 https://apt.pgedge.com pgedge/main\n", 0)
        .respond("psql --version", "psql (PostgreSQL) 17.2\n", 0)
        .respond("SELECT 42", "42\n", 0)
        .respond("systemctl is-active", "active\n", 0)
        .respond("systemctl is-enabled", "enabled\n", 0)
        .respond(
            "systemctl status",
            "● pgedge-postgres-mcp.service\n     Active: active (running) since today\n",
            0,
        )
        .respond("MainPID", "4242\n", 0)
        .respond("dpkg -s", "Status: install ok installed\n", 0)
        .respond("stat -c", "755 root:root\n", 0)
        .respond("%G' /usr/lib/systemd/system/", "644 root:root\n", 0)
        .respond("%G' /var/lib/pgedge/postgres-mcp", "750 pgedge:pgedge\n", 0)
        .respond("%G' /var/log/pgedge/postgres-mcp", "755 pgedge:pgedge\n", 0)
        .respond("%G' /etc/pgedge/postgres-mcp.yaml", "600 pgedge:pgedge\n", 0)
        .respond(
            "cat /etc/pgedge/postgres-mcp.yaml",
            "databases:\n- host: localhost\n  port: 5432\n  database: postgres\n  user: postgres\n",
            0,
        )
        .respond("curl -s -o /dev/null", "200", 0)
        .respond("-add-token", "Token: 3f9c0a\n", 0)
        .echo("-list-tokens")
        .respond("-add-user", "User created\n", 0)
        .echo("-list-users")
        .respond(
            "-mode stdio",
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\n",
            0,
        )
}

#[tokio::test]
async fn test_full_suite_passes_on_healthy_target() {
    let mock = healthy_debian();
    let mut target = mock.clone();
    let report = Orchestrator::new(SuiteConfig::default(), quiet(&[]))
        .run(&mut target)
        .await
        .unwrap();

    let failures: Vec<_> = report
        .records
        .iter()
        .filter(|r| r.status != TestStatus::Pass)
        .map(|r| format!("{}: {:?}", r.name, r.detail))
        .collect();
    assert!(failures.is_empty(), "unexpected failures: {:#?}", failures);
    assert_eq!(report.passed, 11);
    assert_eq!(report.exit_code(), 0);
    assert!(report.phases.values().all(|done| *done));
    assert_eq!(mock.cleanups(), 1);
    assert!(!mock.is_running());
}

#[tokio::test]
async fn test_install_commands_run_once_per_suite() {
    let mock = healthy_debian();
    let mut target = mock.clone();
    Orchestrator::new(SuiteConfig::default(), quiet(&[]))
        .run(&mut target)
        .await
        .unwrap();

    assert_eq!(mock.count_matching("curl -fsSL"), 1);
    assert_eq!(mock.count_matching("apt-get install -y postgresql-17"), 1);
    assert_eq!(mock.count_matching("apt-get install -y pgedge-postgres-mcp"), 1);
    assert_eq!(mock.count_matching("systemctl daemon-reload"), 1);

    let repo = mock.position("curl -fsSL").unwrap();
    let db = mock.position("postgresql-17").unwrap();
    let app = mock.position("pgedge-postgres-mcp pgedge-nla-kb-builder").unwrap();
    assert!(repo < db && db < app);
}

#[tokio::test]
async fn test_new_target_starts_with_fresh_phases() {
    let first = healthy_debian();
    let mut target = first.clone();
    let orchestrator = Orchestrator::new(SuiteConfig::default(), quiet(&["repository_installation"]));
    let report = orchestrator.run(&mut target).await.unwrap();
    assert!(report.phases[&Phase::Repository]);

    let second = healthy_debian();
    let mut target = second.clone();
    let report = orchestrator.run(&mut target).await.unwrap();
    assert!(report.phases[&Phase::Repository]);
    assert!(!report.phases[&Phase::DatabaseEngine]);
    // The repository was installed again on the new target
    assert_eq!(second.count_matching("curl -fsSL"), 1);
    assert_eq!(first.count_matching("curl -fsSL"), 1);
}

#[tokio::test]
async fn test_single_case_installs_its_own_preconditions() {
    let mock = healthy_debian();
    let mut target = mock.clone();
    let report = Orchestrator::new(SuiteConfig::default(), quiet(&["file_permissions"]))
        .run(&mut target)
        .await
        .unwrap();

    assert_eq!(report.status_of("file_permissions"), Some(TestStatus::Pass));
    assert_eq!(report.status_of("repository_installation"), Some(TestStatus::Skip));
    assert!(report.phases[&Phase::Configuration]);
    assert!(!report.phases[&Phase::ServiceRunning]);
}

#[tokio::test]
async fn test_failure_does_not_abort_remaining_cases() {
    let mock = healthy_debian().respond("curl -s -o /dev/null", "000", 7);
    let mut config = SuiteConfig::default();
    config.target.log_window_lines = 5;
    config.timeouts.probe_attempts = 3;
    config.timeouts.probe_interval_ms = 0;
    let mut target = mock.clone();
    let report = Orchestrator::new(config, quiet(&[]))
        .with_cases(vec![
            harness::suite::find_case("http_endpoint").unwrap(),
            harness::suite::find_case("token_management").unwrap(),
        ])
        .run(&mut target)
        .await
        .unwrap();
    assert_eq!(report.status_of("http_endpoint"), Some(TestStatus::Fail));
    assert_eq!(report.status_of("token_management"), Some(TestStatus::Pass));
    assert_eq!(report.exit_code(), 1);

    let failed = &report.records[0];
    let logs = failed.logs.as_deref().unwrap();
    assert!(logs.lines().count() <= 5);
    assert!(logs.contains("curl -s -o /dev/null"));
}

#[tokio::test]
async fn test_cleanup_runs_when_every_case_fails() {
    let mock = MockTarget::debian().fail_dispatch("", "connection reset by peer");
    let mut target = mock.clone();
    let report = Orchestrator::new(SuiteConfig::default(), quiet(&[]))
        .run(&mut target)
        .await
        .unwrap();

    assert_eq!(report.failed, 11);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(mock.cleanups(), 1);
    assert!(report.phases.values().all(|done| !*done));
}

#[tokio::test]
async fn test_cleanup_failure_is_only_a_warning() {
    let mock = healthy_debian().failing_cleanup();
    let mut target = mock.clone();
    let report = Orchestrator::new(SuiteConfig::default(), quiet(&["repository_installation"]))
        .run(&mut target)
        .await
        .unwrap();

    assert_eq!(report.exit_code(), 0);
    assert!(report.cleanup_warning.is_some());
    assert_eq!(mock.cleanups(), 1);
}

#[tokio::test]
async fn test_start_failure_still_cleans_up() {
    let mock = MockTarget::debian().failing_start();
    let mut target = mock.clone();
    let err = Orchestrator::new(SuiteConfig::default(), quiet(&[]))
        .run(&mut target)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::EnvironmentUnavailable(_)));
    assert_eq!(mock.cleanups(), 1);
    assert!(mock.history().is_empty());
}

#[tokio::test]
async fn test_user_management_passes_on_a_reused_host() {
    // The host still has the user created by an earlier run
    let mock = healthy_debian().respond(
        "-username harness-user -password",
        "error: user 'harness-user' already exists\n",
        1,
    );
    let mut target = mock.clone();
    let report = Orchestrator::new(SuiteConfig::default(), quiet(&["user_management"]))
        .run(&mut target)
        .await
        .unwrap();

    assert_eq!(report.status_of("user_management"), Some(TestStatus::Pass));
    assert_eq!(mock.count_matching("-add-user"), 1);
}

#[tokio::test]
async fn test_debian_repository_scenario() {
    let mock = healthy_debian();
    let mut target = mock.clone();
    target.start().await.unwrap();
    let mut state = harness::InstallState::new(&SuiteConfig::default());
    state.ensure_repository_installed(&target).await.unwrap();

    let update = mock.position("apt-get update").unwrap();
    let install = mock.position("apt-get install").unwrap();
    assert!(update < install);

    let out = target
        .exec(
            "test -f /etc/apt/sources.list.d/pgedge.list && echo exists",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(out.exit_code, 0);
    assert!(out.contains("exists"));

    target.cleanup().await.unwrap();
    let err = target.exec("true", Duration::from_secs(5)).await.unwrap_err();
    assert!(err.is_dispatch_failure());
}

#[tokio::test]
async fn test_exit_code_is_not_an_error() {
    let out = run_shell("exit 3", Duration::from_secs(10)).await.unwrap();
    assert_eq!(out, ExecOutput::new("", 3));

    let out = run_shell("exit 2", Duration::from_secs(10)).await.unwrap();
    assert_eq!(out.exit_code, 2);
}

fn harness_bin() -> Command {
    Command::new(env!("CARGO_BIN_EXE_install-harness"))
}

fn empty_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[target]\nmode = \"local\"").unwrap();
    file
}

#[test]
fn test_cli_list_prints_cases_in_order() {
    let config = empty_config();
    let output = harness_bin()
        .args(["list", "--config"])
        .arg(config.path())
        .env("NO_COLOR", "1")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let repo = stdout.find("repository_installation").unwrap();
    let stdio = stdout.find("stdio_mode").unwrap();
    assert!(repo < stdio);
}

#[test]
fn test_cli_unknown_case_fails() {
    let config = empty_config();
    let output = harness_bin()
        .args(["run", "--only", "no_such_case", "--config"])
        .arg(config.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no_such_case"));
}

#[test]
fn test_cli_config_applies_file_and_env() {
    let config = empty_config();
    let output = harness_bin()
        .args(["config", "--config"])
        .arg(config.path())
        .env("HARNESS_IMAGE", "rockylinux/rockylinux:9-ubi-init")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("mode = \"local\""));
    assert!(stdout.contains("rockylinux/rockylinux:9-ubi-init"));
}
