//! The installation test cases
//!
//! Every case first demands the phases it depends on, then inspects the
//! footprint the phase left behind through plain shell queries.

use async_trait::async_trait;

use super::{TestCase, TestContext};
use crate::common::{shell_quote, unique_suffix, Error, Result};
use crate::install::plan::repository_file;
use crate::install::Phase;
use crate::target::OsFamily;

/// Prefixes for the names the management cases create; every run appends a
/// fresh suffix so that earlier runs on the same host do not collide
const TOKEN_NOTE_PREFIX: &str = "install-harness";
const TEST_USER_PREFIX: &str = "harness-user";
const TEST_PASSWORD: &str = "Harness-Passw0rd";
const STDIO_TIMEOUT_SECS: u64 = 15;

pub struct RepositoryInstallation;

#[async_trait]
impl TestCase for RepositoryInstallation {
    fn name(&self) -> &'static str {
        "repository_installation"
    }

    fn description(&self) -> &'static str {
        "Package repository is registered with the system package manager"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::Repository).await?;
        let family = ctx.family().await?;
        let file = repository_file(family, &ctx.config().repository.name);
        ctx.assert_file_exists(&file).await?;

        let listing = match family {
            OsFamily::Debian => "apt-cache policy",
            OsFamily::Rhel => "dnf repolist",
        };
        ctx.expect_output(listing, &ctx.config().repository.name)
            .await?;
        Ok(())
    }
}

pub struct DatabaseEngineInstallation;

#[async_trait]
impl TestCase for DatabaseEngineInstallation {
    fn name(&self) -> &'static str {
        "database_engine_installation"
    }

    fn description(&self) -> &'static str {
        "Database engine is installed, running and accepts the configured credentials"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::DatabaseEngine).await?;
        let plan = ctx.plan().await?;

        let psql = format!("{}/psql", plan.database_bin_dir());
        ctx.expect_output(&format!("{} --version", psql), "PostgreSQL")
            .await?;

        let service = plan.database_service();
        ctx.expect_output(&format!("systemctl is-active {}", service), "active")
            .await?;

        let db = &ctx.config().database;
        let query = format!(
            "PGPASSWORD={} {} -h {} -p {} -U {} -d {} -tAc 'SELECT 42'",
            shell_quote(&db.password),
            psql,
            shell_quote(&db.host),
            db.port,
            shell_quote(&db.user),
            shell_quote(&db.name)
        );
        ctx.expect_output(&query, "42").await?;
        Ok(())
    }
}

pub struct PackageInstallation;

#[async_trait]
impl TestCase for PackageInstallation {
    fn name(&self) -> &'static str {
        "package_installation"
    }

    fn description(&self) -> &'static str {
        "Application packages are installed and their binaries are executable"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::ApplicationPackages).await?;
        let family = ctx.family().await?;
        let app = ctx.config().application.clone();

        for package in &app.packages {
            let query = match family {
                OsFamily::Debian => format!("dpkg -s {}", shell_quote(package)),
                OsFamily::Rhel => format!("rpm -q {}", shell_quote(package)),
            };
            let out = ctx.expect_success(&query).await?;
            if family == OsFamily::Debian {
                out.expect_contains(&query, "install ok installed")?;
            }
        }

        ctx.assert_executable(&app.binary).await?;
        ctx.assert_executable(&app.kb_builder_binary).await?;
        ctx.assert_file_exists(&app.unit_file).await?;
        Ok(())
    }
}

/// Expected `stat` result for one path
struct Expectation<'a> {
    path: &'a str,
    mode: &'a str,
    owner: &'a str,
}

pub struct FilePermissions;

#[async_trait]
impl TestCase for FilePermissions {
    fn name(&self) -> &'static str {
        "file_permissions"
    }

    fn description(&self) -> &'static str {
        "Installed files and directories have the expected modes and owners"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::Configuration).await?;
        let app = ctx.config().application.clone();

        let expectations = [
            Expectation { path: &app.binary, mode: "755", owner: "root:root" },
            Expectation { path: &app.kb_builder_binary, mode: "755", owner: "root:root" },
            Expectation { path: &app.unit_file, mode: "644", owner: "root:root" },
            Expectation { path: &app.config_dir, mode: "755", owner: "root:root" },
            Expectation { path: &app.data_dir, mode: "750", owner: &app.owner },
            Expectation { path: &app.log_dir, mode: "755", owner: &app.owner },
        ];

        let mut mismatches = Vec::new();
        for expected in &expectations {
            let actual = ctx.stat(expected.path).await?;
            if actual.mode != expected.mode || actual.owner != expected.owner {
                mismatches.push(format!(
                    "{}: expected {} {}, found {} {}",
                    expected.path, expected.mode, expected.owner, actual.mode, actual.owner
                ));
            }
        }

        if mismatches.is_empty() {
            Ok(())
        } else {
            Err(Error::assertion(mismatches.join("\n")))
        }
    }
}

pub struct Configuration;

#[async_trait]
impl TestCase for Configuration {
    fn name(&self) -> &'static str {
        "configuration"
    }

    fn description(&self) -> &'static str {
        "Configuration file is written, private to the service account and complete"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::Configuration).await?;
        let app = ctx.config().application.clone();
        let db = ctx.config().database.clone();

        ctx.assert_dir_exists(&app.config_dir).await?;
        ctx.assert_file_exists(&app.config_file).await?;

        let stat = ctx.stat(&app.config_file).await?;
        if stat.mode != "600" || stat.owner != app.owner {
            return Err(Error::assertion(format!(
                "{}: expected 600 {}, found {} {}",
                app.config_file, app.owner, stat.mode, stat.owner
            )));
        }

        let cat = format!("cat {}", shell_quote(&app.config_file));
        let out = ctx.expect_success(&cat).await?;
        for needle in [
            format!("port: {}", db.port),
            format!("database: {}", db.name),
            format!("user: {}", db.user),
        ] {
            if !out.contains(&needle) {
                return Err(Error::assertion(format!(
                    "{} does not contain '{}'",
                    app.config_file, needle
                )));
            }
        }
        Ok(())
    }
}

pub struct ServiceStart;

#[async_trait]
impl TestCase for ServiceStart {
    fn name(&self) -> &'static str {
        "service_start"
    }

    fn description(&self) -> &'static str {
        "Service unit is enabled and starts"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::ServiceRunning).await?;
        let service = shell_quote(&ctx.config().application.service);

        ctx.expect_output(&format!("systemctl is-enabled {}", service), "enabled")
            .await?;
        // Starting an already running unit is a no-op that exits 0
        ctx.expect_success(&format!("systemctl start {}", service))
            .await?;
        let out = ctx
            .expect_success(&format!("systemctl is-active {}", service))
            .await?;
        if out.trimmed() != "active" {
            return Err(Error::assertion(format!(
                "Service {} is '{}', expected 'active'",
                service,
                out.trimmed()
            )));
        }
        Ok(())
    }
}

pub struct ServiceStatus;

#[async_trait]
impl TestCase for ServiceStatus {
    fn name(&self) -> &'static str {
        "service_status"
    }

    fn description(&self) -> &'static str {
        "Service manager reports the unit as loaded and running"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::ServiceRunning).await?;
        let service = ctx.config().application.service.clone();
        let command = format!("systemctl status {} --no-pager", shell_quote(&service));

        // 3 means "not running"; accepted here so the output below explains why
        let out = ctx.expect_exit(&command, &[0, 3]).await?;
        let out = out.expect_contains(&command, "Active: active (running)")?;
        out.expect_contains(&command, &service)?;

        let main_pid = format!(
            "systemctl show -p MainPID --value {}",
            shell_quote(&service)
        );
        let out = ctx.expect_success(&main_pid).await?;
        match out.trimmed().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(()),
            _ => Err(Error::assertion(format!(
                "Service {} has no main process (MainPID={})",
                service,
                out.trimmed()
            ))),
        }
    }
}

pub struct HttpEndpoint;

#[async_trait]
impl TestCase for HttpEndpoint {
    fn name(&self) -> &'static str {
        "http_endpoint"
    }

    fn description(&self) -> &'static str {
        "Service answers HTTP requests on its configured port"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::ServiceRunning).await?;
        let app = ctx.config().application.clone();
        let url = format!("http://localhost:{}{}", app.http_port, app.http_path);
        let command = format!(
            "curl -s -o /dev/null -w '%{{http_code}}' --max-time 5 {}",
            shell_quote(&url)
        );

        let attempts = ctx.config().timeouts.probe_attempts;
        let interval = ctx.config().timeouts.probe_interval();
        let mut last = String::new();
        for attempt in 1..=attempts {
            // 7: connection refused, 28: timed out; the service may still be binding
            let out = ctx.expect_exit(&command, &[0, 7, 28]).await?;
            last = out.trimmed().to_string();
            if let Ok(status) = last.parse::<u16>() {
                if app.accepted_http_status.contains(&status) {
                    tracing::debug!(attempt, status, "endpoint reachable");
                    return Ok(());
                }
            }
            if attempt < attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(Error::assertion(format!(
            "{} not reachable after {} attempts (last status '{}', accepted {:?})",
            url, attempts, last, app.accepted_http_status
        )))
    }
}

/// `<binary> -config <file>` prefix for the management subcommands
fn app_command(ctx: &TestContext<'_>) -> String {
    let app = &ctx.config().application;
    format!(
        "{} -config {}",
        shell_quote(&app.binary),
        shell_quote(&app.config_file)
    )
}

pub struct TokenManagement;

#[async_trait]
impl TestCase for TokenManagement {
    fn name(&self) -> &'static str {
        "token_management"
    }

    fn description(&self) -> &'static str {
        "API tokens can be created and listed"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::Configuration).await?;
        let base = app_command(ctx);
        let note = format!("{}-{}", TOKEN_NOTE_PREFIX, unique_suffix());

        ctx.expect_output(
            &format!("{} -add-token -token-note {}", base, note),
            "Token:",
        )
        .await?;
        ctx.expect_output(
            &format!("{} -list-tokens | grep -F -- {}", base, note),
            &note,
        )
        .await?;
        Ok(())
    }
}

pub struct UserManagement;

#[async_trait]
impl TestCase for UserManagement {
    fn name(&self) -> &'static str {
        "user_management"
    }

    fn description(&self) -> &'static str {
        "Users can be created and listed"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::Configuration).await?;
        let base = app_command(ctx);
        let user = format!("{}-{}", TEST_USER_PREFIX, unique_suffix());

        ctx.expect_output(
            &format!(
                "{} -add-user -username {} -password {}",
                base, user, TEST_PASSWORD
            ),
            "User created",
        )
        .await?;
        ctx.expect_output(
            &format!("{} -list-users | grep -F -- {}", base, user),
            &user,
        )
        .await?;
        Ok(())
    }
}

pub struct StdioMode;

#[async_trait]
impl TestCase for StdioMode {
    fn name(&self) -> &'static str {
        "stdio_mode"
    }

    fn description(&self) -> &'static str {
        "Binary answers an initialize request over stdin/stdout"
    }

    async fn run(&self, ctx: &mut TestContext<'_>) -> Result<()> {
        ctx.ensure(Phase::Configuration).await?;
        let request = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"install-harness","version":"0"}}}"#;
        let command = format!(
            "printf '%s\\n' {} | timeout {} {} -mode stdio",
            shell_quote(request),
            STDIO_TIMEOUT_SECS,
            app_command(ctx)
        );

        // 124: timeout(1) stopped a server that kept waiting for input
        let out = ctx.expect_exit(&command, &[0, 124]).await?;
        out.expect_contains(&command, "\"jsonrpc\"")?;
        Ok(())
    }
}
