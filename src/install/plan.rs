//! OS-family specific command sequences for each installation phase

use serde::Serialize;

use super::Phase;
use crate::common::{shell_quote, Result, SuiteConfig};
use crate::target::OsFamily;

const APT_INSTALL: &str = "DEBIAN_FRONTEND=noninteractive apt-get install -y";
const HEREDOC_MARKER: &str = "HARNESS_EOF";

/// Commands for one target OS family
pub struct InstallPlan<'a> {
    config: &'a SuiteConfig,
    family: OsFamily,
}

impl<'a> InstallPlan<'a> {
    pub fn new(config: &'a SuiteConfig, family: OsFamily) -> Self {
        Self { config, family }
    }

    /// Ordered commands for `phase`; every one must exit 0
    pub fn commands(&self, phase: Phase) -> Result<Vec<String>> {
        Ok(match phase {
            Phase::Repository => self.repository(),
            Phase::DatabaseEngine => self.database_engine(),
            Phase::ApplicationPackages => self.application_packages(),
            Phase::Configuration => self.configuration()?,
            Phase::ServiceRunning => self.service_running(),
        })
    }

    /// File the repository phase leaves behind
    pub fn repository_file(&self) -> String {
        repository_file(self.family, &self.config.repository.name)
    }

    /// systemd unit of the database engine
    pub fn database_service(&self) -> String {
        let version = &self.config.database.version;
        match self.family {
            OsFamily::Debian => "postgresql".to_string(),
            OsFamily::Rhel => format!("postgresql-{}", version),
        }
    }

    /// Directory holding the database client binaries
    pub fn database_bin_dir(&self) -> String {
        let version = &self.config.database.version;
        match self.family {
            OsFamily::Debian => format!("/usr/lib/postgresql/{}/bin", version),
            OsFamily::Rhel => format!("/usr/pgsql-{}/bin", version),
        }
    }

    fn repository(&self) -> Vec<String> {
        let repo = &self.config.repository;
        match self.family {
            OsFamily::Debian => {
                let deb = format!("/tmp/{}-release.deb", repo.name);
                vec![
                    "apt-get update".to_string(),
                    format!("{} curl gnupg ca-certificates", APT_INSTALL),
                    format!(
                        "curl -fsSL -o {} {}",
                        shell_quote(&deb),
                        shell_quote(&repo.deb_url)
                    ),
                    format!("{} {}", APT_INSTALL, shell_quote(&deb)),
                    "apt-get update".to_string(),
                ]
            }
            OsFamily::Rhel => vec![
                "dnf -y makecache".to_string(),
                format!("dnf install -y {}", shell_quote(&repo.rpm_url)),
                "dnf -y makecache".to_string(),
            ],
        }
    }

    fn database_engine(&self) -> Vec<String> {
        let db = &self.config.database;
        let service = self.database_service();
        let mut commands = match self.family {
            OsFamily::Debian => vec![
                format!("{} postgresql-{}", APT_INSTALL, db.version),
                format!("systemctl enable {}", service),
                format!("systemctl start {}", service),
            ],
            OsFamily::Rhel => {
                let data_dir = format!("/var/lib/pgsql/{}/data", db.version);
                vec![
                    format!("dnf install -y postgresql{}-server", db.version),
                    format!(
                        "test -f {data}/PG_VERSION || {bin}/postgresql-{v}-setup initdb",
                        data = data_dir,
                        bin = self.database_bin_dir(),
                        v = db.version
                    ),
                    // initdb defaults to ident for TCP connections
                    format!(
                        "sed -i -E 's/(host.*)ident$/\\1scram-sha-256/' {}/pg_hba.conf",
                        data_dir
                    ),
                    format!("systemctl enable {}", service),
                    format!("systemctl start {}", service),
                ]
            }
        };
        commands.push(self.database_role_command());
        commands
    }

    /// Create the configured login role if needed and set its password
    fn database_role_command(&self) -> String {
        let db = &self.config.database;
        let role = db.user.replace('"', "\"\"");
        let literal = |s: &str| s.replace('\'', "''");
        let sql = format!(
            "DO $$BEGIN IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = '{name}') \
             THEN CREATE ROLE \"{role}\" LOGIN SUPERUSER; END IF; END$$; \
             ALTER ROLE \"{role}\" WITH PASSWORD '{password}';",
            name = literal(&db.user),
            role = role,
            password = literal(&db.password),
        );
        let psql = format!("psql -v ON_ERROR_STOP=1 -c {}", shell_quote(&sql));
        format!("su - postgres -c {}", shell_quote(&psql))
    }

    fn application_packages(&self) -> Vec<String> {
        let packages = self
            .config
            .application
            .packages
            .iter()
            .map(|p| shell_quote(p))
            .collect::<Vec<_>>()
            .join(" ");
        match self.family {
            OsFamily::Debian => vec![format!("{} {}", APT_INSTALL, packages)],
            OsFamily::Rhel => vec![format!("dnf install -y {}", packages)],
        }
    }

    fn configuration(&self) -> Result<Vec<String>> {
        let app = &self.config.application;
        let (user, group) = app
            .owner
            .split_once(':')
            .unwrap_or((app.owner.as_str(), app.owner.as_str()));
        let yaml = render_app_config(self.config)?;
        let config_file = shell_quote(&app.config_file);

        Ok(vec![
            format!("install -d -m 755 {}", shell_quote(&app.config_dir)),
            format!(
                "cat > {} <<'{marker}'\n{}{marker}",
                config_file,
                yaml,
                marker = HEREDOC_MARKER
            ),
            format!("chown {} {}", shell_quote(&app.owner), config_file),
            format!("chmod 600 {}", config_file),
            format!(
                "install -d -m 750 -o {} -g {} {}",
                shell_quote(user),
                shell_quote(group),
                shell_quote(&app.data_dir)
            ),
            format!(
                "install -d -m 755 -o {} -g {} {}",
                shell_quote(user),
                shell_quote(group),
                shell_quote(&app.log_dir)
            ),
        ])
    }

    fn service_running(&self) -> Vec<String> {
        let service = shell_quote(&self.config.application.service);
        vec![
            "systemctl daemon-reload".to_string(),
            format!("systemctl enable {}", service),
            format!("systemctl start {}", service),
            format!("systemctl is-active {}", service),
        ]
    }
}

/// Path of the package-manager source registered by the repository phase
pub fn repository_file(family: OsFamily, name: &str) -> String {
    match family {
        OsFamily::Debian => format!("/etc/apt/sources.list.d/{}.list", name),
        OsFamily::Rhel => format!("/etc/yum.repos.d/{}.repo", name),
    }
}

#[derive(Serialize)]
struct AppConfigFile<'a> {
    http: HttpSection,
    databases: Vec<DatabaseSection<'a>>,
    data_dir: &'a str,
    log_dir: &'a str,
}

#[derive(Serialize)]
struct HttpSection {
    enabled: bool,
    address: String,
    auth: AuthSection,
}

#[derive(Serialize)]
struct AuthSection {
    enabled: bool,
}

#[derive(Serialize)]
struct DatabaseSection<'a> {
    host: &'a str,
    port: u16,
    database: &'a str,
    user: &'a str,
    password: &'a str,
    sslmode: &'a str,
}

/// YAML config file for the application under test
pub fn render_app_config(config: &SuiteConfig) -> Result<String> {
    let app = &config.application;
    let db = &config.database;
    let file = AppConfigFile {
        http: HttpSection {
            enabled: true,
            address: format!(":{}", app.http_port),
            auth: AuthSection { enabled: true },
        },
        databases: vec![DatabaseSection {
            host: &db.host,
            port: db.port,
            database: &db.name,
            user: &db.user,
            password: &db.password,
            sslmode: "disable",
        }],
        data_dir: &app.data_dir,
        log_dir: &app.log_dir,
    };
    let mut yaml = serde_yaml::to_string(&file)?;
    if !yaml.ends_with('\n') {
        yaml.push('\n');
    }
    Ok(yaml)
}
