//! Configuration file handling
//!
//! Every setting has a built-in default, so an empty (or missing) config
//! file yields a runnable suite against a Debian container.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};
use crate::target::TargetMode;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SuiteConfig {
    /// Where commands run
    #[serde(default)]
    pub target: TargetConfig,

    /// Command deadlines
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Package repository under test
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Database engine installed before the application
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Application packages and their footprint
    #[serde(default)]
    pub application: ApplicationConfig,
}

/// Execution target settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    #[serde(default)]
    pub mode: TargetMode,

    /// Container image; must boot a service manager
    #[serde(default = "default_image")]
    pub image: String,

    /// Command the container runs as PID 1
    #[serde(default = "default_init_command")]
    pub init_command: String,

    /// Container runtime CLI (docker or podman)
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,

    /// Delay after container start before the first command
    #[serde(default = "default_readiness_delay")]
    pub readiness_delay_secs: u64,

    /// Grace period for `stop` before force removal
    #[serde(default = "default_stop_grace")]
    pub stop_grace_secs: u64,

    /// Number of log lines attached to a failed test case
    #[serde(default = "default_log_window")]
    pub log_window_lines: usize,

    /// Run local commands through `sudo -n`
    #[serde(default = "default_true")]
    pub elevate: bool,

    /// Install the baseline toolset on the local host during start
    #[serde(default = "default_true")]
    pub install_baseline: bool,

    /// Where the local target writes its command transcript; defaults to
    /// the harness log directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<PathBuf>,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            mode: TargetMode::default(),
            image: default_image(),
            init_command: default_init_command(),
            container_runtime: default_container_runtime(),
            readiness_delay_secs: default_readiness_delay(),
            stop_grace_secs: default_stop_grace(),
            log_window_lines: default_log_window(),
            elevate: true,
            install_baseline: true,
            transcript_dir: None,
        }
    }
}

fn default_image() -> String {
    "jrei/systemd-debian:12".to_string()
}
fn default_init_command() -> String {
    "/sbin/init".to_string()
}
fn default_container_runtime() -> String {
    "docker".to_string()
}
fn default_readiness_delay() -> u64 {
    3
}
fn default_stop_grace() -> u64 {
    10
}
fn default_log_window() -> usize {
    100
}
fn default_true() -> bool {
    true
}

/// Timeout settings in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    /// Deadline for ordinary commands
    #[serde(default = "default_exec")]
    pub exec_secs: u64,

    /// Deadline for package-manager commands
    #[serde(default = "default_install")]
    pub install_secs: u64,

    /// How often the HTTP endpoint is probed before giving up
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: usize,

    /// Pause between HTTP probes, in milliseconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            exec_secs: default_exec(),
            install_secs: default_install(),
            probe_attempts: default_probe_attempts(),
            probe_interval_ms: default_probe_interval(),
        }
    }
}

fn default_exec() -> u64 {
    60
}
fn default_install() -> u64 {
    900
}
fn default_probe_attempts() -> usize {
    15
}
fn default_probe_interval() -> u64 {
    2000
}

impl Timeouts {
    pub fn exec(&self) -> Duration {
        Duration::from_secs(self.exec_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Package repository settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryConfig {
    /// Release package registering the APT source
    #[serde(default = "default_deb_url")]
    pub deb_url: String,

    /// Release package registering the YUM/DNF repository
    #[serde(default = "default_rpm_url")]
    pub rpm_url: String,

    /// Stem of `/etc/apt/sources.list.d/<name>.list` and `/etc/yum.repos.d/<name>.repo`
    #[serde(default = "default_repo_name")]
    pub name: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            deb_url: default_deb_url(),
            rpm_url: default_rpm_url(),
            name: default_repo_name(),
        }
    }
}

fn default_deb_url() -> String {
    "https://apt.pgedge.com/repodeb/pgedge-release_latest_all.deb".to_string()
}
fn default_rpm_url() -> String {
    "https://dnf.pgedge.com/reporpm/pgedge-release-latest.noarch.rpm".to_string()
}
fn default_repo_name() -> String {
    "pgedge".to_string()
}

/// Database engine settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Major version installed from the repository
    #[serde(default = "default_db_version")]
    pub version: String,

    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub user: String,

    #[serde(default = "default_db_password")]
    pub password: String,

    #[serde(default = "default_db_name")]
    pub name: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            version: default_db_version(),
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: default_db_password(),
            name: default_db_name(),
        }
    }
}

fn default_db_version() -> String {
    "17".to_string()
}
fn default_db_host() -> String {
    "localhost".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_user() -> String {
    "postgres".to_string()
}
fn default_db_password() -> String {
    "postgres".to_string()
}
fn default_db_name() -> String {
    "postgres".to_string()
}

/// Application package settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// Packages installed in the application phase
    #[serde(default = "default_packages")]
    pub packages: Vec<String>,

    /// Main executable
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Knowledge-base builder executable
    #[serde(default = "default_kb_builder")]
    pub kb_builder_binary: String,

    /// systemd unit name
    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default = "default_unit_file")]
    pub unit_file: String,

    #[serde(default = "default_config_dir")]
    pub config_dir: String,

    /// Config file written in the configuration phase
    #[serde(default = "default_config_file")]
    pub config_file: String,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Service account as `user:group`
    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_http_path")]
    pub http_path: String,

    /// HTTP status codes that prove the service is listening
    #[serde(default = "default_accepted_status")]
    pub accepted_http_status: Vec<u16>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            packages: default_packages(),
            binary: default_binary(),
            kb_builder_binary: default_kb_builder(),
            service: default_service(),
            unit_file: default_unit_file(),
            config_dir: default_config_dir(),
            config_file: default_config_file(),
            data_dir: default_data_dir(),
            log_dir: default_log_dir(),
            owner: default_owner(),
            http_port: default_http_port(),
            http_path: default_http_path(),
            accepted_http_status: default_accepted_status(),
        }
    }
}

fn default_packages() -> Vec<String> {
    vec![
        "pgedge-postgres-mcp".to_string(),
        "pgedge-nla-kb-builder".to_string(),
    ]
}
fn default_binary() -> String {
    "/usr/bin/pgedge-postgres-mcp".to_string()
}
fn default_kb_builder() -> String {
    "/usr/bin/pgedge-nla-kb-builder".to_string()
}
fn default_service() -> String {
    "pgedge-postgres-mcp".to_string()
}
fn default_unit_file() -> String {
    "/usr/lib/systemd/system/pgedge-postgres-mcp.service".to_string()
}
fn default_config_dir() -> String {
    "/etc/pgedge".to_string()
}
fn default_config_file() -> String {
    "/etc/pgedge/postgres-mcp.yaml".to_string()
}
fn default_data_dir() -> String {
    "/var/lib/pgedge/postgres-mcp".to_string()
}
fn default_log_dir() -> String {
    "/var/log/pgedge/postgres-mcp".to_string()
}
fn default_owner() -> String {
    "pgedge:pgedge".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_http_path() -> String {
    "/mcp/v1".to_string()
}
fn default_accepted_status() -> Vec<u16> {
    vec![200, 401, 405]
}

impl SuiteConfig {
    /// Load configuration from the given file, or the default config file
    ///
    /// Returns default configuration if no file is given and the default one
    /// doesn't exist. Environment overrides are applied afterwards.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply `HARNESS_*` overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup("HARNESS_IMAGE") {
            self.target.image = image;
        }
        if let Some(url) = lookup("HARNESS_REPO_DEB_URL") {
            self.repository.deb_url = url;
        }
        if let Some(url) = lookup("HARNESS_REPO_RPM_URL") {
            self.repository.rpm_url = url;
        }
        if let Some(password) = lookup("HARNESS_DB_PASSWORD") {
            self.database.password = password;
        }
    }

    /// Reject settings that cannot produce a meaningful run
    pub fn validate(&self) -> Result<()> {
        if self.target.image.trim().is_empty() {
            return Err(Error::Config("target.image must not be empty".to_string()));
        }
        if self.application.packages.is_empty() {
            return Err(Error::Config(
                "application.packages must list at least one package".to_string(),
            ));
        }
        if !self.application.owner.contains(':') {
            return Err(Error::Config(format!(
                "application.owner must be 'user:group', got '{}'",
                self.application.owner
            )));
        }
        if self.timeouts.exec_secs == 0
            || self.timeouts.install_secs == 0
            || self.timeouts.probe_attempts == 0
        {
            return Err(Error::Config("timeouts must be greater than zero".to_string()));
        }
        Ok(())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config: SuiteConfig = toml::from_str("").unwrap();
        assert_eq!(config.target.mode, TargetMode::Container);
        assert_eq!(config.database.port, 5432);
        assert_eq!(config.application.owner, "pgedge:pgedge");
        assert_eq!(config.target.transcript_dir, None);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config: SuiteConfig = toml::from_str(
            r#"
[target]
mode = "local"
transcript_dir = "/var/tmp/harness"

[database]
version = "16"
"#,
        )
        .unwrap();
        assert_eq!(config.target.mode, TargetMode::Local);
        assert_eq!(
            config.target.transcript_dir,
            Some(PathBuf::from("/var/tmp/harness"))
        );
        assert_eq!(config.target.image, "jrei/systemd-debian:12");
        assert_eq!(config.database.version, "16");
        assert_eq!(config.database.user, "postgres");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SuiteConfig::default();
        config.apply_env(|key| match key {
            "HARNESS_IMAGE" => Some("rockylinux/rockylinux:9-ubi-init".to_string()),
            "HARNESS_DB_PASSWORD" => Some("s3cret".to_string()),
            _ => None,
        });
        assert_eq!(config.target.image, "rockylinux/rockylinux:9-ubi-init");
        assert_eq!(config.database.password, "s3cret");
        assert_eq!(config.repository.name, "pgedge");
    }

    #[test]
    fn test_invalid_owner_rejected() {
        let mut config = SuiteConfig::default();
        config.application.owner = "pgedge".to_string();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_from_file_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[target\nmode = 3").unwrap();
        let err = SuiteConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }
}
