//! TOML configuration for the report archiver.
//!
//! Configuration is read once at startup and treated as immutable for the
//! lifetime of the process. The only runtime-mutable piece, the archiver's
//! `enabled` state, lives on [`crate::archiver::ReportsArchiver`] instead.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::execution::REPORTS_FOLDER_NAME;

/// Environment variable naming the config file to load.
pub const CONFIG_ENV: &str = "REPORT_ARCHIVER_CONFIG";

/// Standard system location of the config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/report-archiver/archiver.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid remote server address '{address}': {reason}")]
    InvalidRemoteServer { address: String, reason: String },

    #[error("worker_threads must be at least 1")]
    NoWorkers,

    #[error("interval_secs must be greater than zero")]
    ZeroInterval,

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for the archiver process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiverConfig {
    #[serde(default)]
    pub archiver: ArchiverSection,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ArchiverConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded archiver configuration");
        Ok(config)
    }

    /// Resolve the configuration, in order:
    /// 1. An explicit path (from the CLI). Failing to load it is an error.
    /// 2. The path in `REPORT_ARCHIVER_CONFIG`.
    /// 3. `/etc/report-archiver/archiver.toml`.
    /// 4. Compiled-in defaults.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        Ok(Self::load_or_default())
    }

    /// Steps 2-4 of [`ArchiverConfig::resolve`].
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "REPORT_ARCHIVER_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// Reject settings the archiver cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.archiver;
        if let Err(e) = reqwest::Url::parse(&a.remote_server) {
            return Err(ConfigError::InvalidRemoteServer {
                address: a.remote_server.clone(),
                reason: e.to_string(),
            });
        }
        if a.worker_threads == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if a.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if let Some(expr) = &a.schedule {
            cron::Schedule::from_str(expr).map_err(|e| ConfigError::InvalidSchedule {
                expr: expr.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// The local folder holding one sub-folder per archived execution.
    pub fn reports_folder(&self) -> PathBuf {
        self.storage.docroot.join(REPORTS_FOLDER_NAME)
    }
}

// ---------------------------------------------------------------------------
// Archiver
// ---------------------------------------------------------------------------

/// Settings of the archive cycle itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiverSection {
    /// Administrative switch. A disabled archiver never runs a cycle.
    pub enabled: bool,
    /// Base URL of the remote reporting server.
    pub remote_server: String,
    /// Executions younger than this are left on the remote server.
    pub min_reports_age_days: u32,
    /// Upper bound on executions archived per cycle.
    pub max_to_archive: usize,
    /// Issue a remote delete once an execution is committed locally.
    pub delete_after_archive: bool,
    /// Ask the remote server to drop the execution from its search index too.
    pub delete_from_elastic: bool,
    /// Maximum executions processed concurrently within a cycle.
    pub worker_threads: usize,
    /// Seconds between cycles when no `schedule` is set.
    pub interval_secs: u64,
    /// Optional cron expression (seconds field included); overrides `interval_secs`.
    pub schedule: Option<String>,
    /// Bound on every request to the remote server.
    pub request_timeout_secs: u64,
    /// Where zip archives are downloaded before extraction. Defaults to the OS temp dir.
    pub download_dir: Option<PathBuf>,
}

impl Default for ArchiverSection {
    fn default() -> Self {
        Self {
            enabled: false,
            remote_server: "http://localhost:8080".to_string(),
            min_reports_age_days: 30,
            max_to_archive: 5,
            delete_after_archive: false,
            delete_from_elastic: false,
            worker_threads: 4,
            interval_secs: 3600,
            schedule: None,
            request_timeout_secs: 60,
            download_dir: None,
        }
    }
}

impl ArchiverSection {
    pub fn min_reports_age(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.min_reports_age_days))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Document root; archived reports live under `<docroot>/reports`.
    pub docroot: PathBuf,
    /// SQLite database holding the local execution metadata.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            docroot: PathBuf::from("docRoot"),
            db_path: PathBuf::from("data/report-archiver.db"),
        }
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address of the health/info endpoints.
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8081".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = ArchiverConfig::default();

        assert!(!cfg.archiver.enabled);
        assert_eq!(cfg.archiver.remote_server, "http://localhost:8080");
        assert_eq!(cfg.archiver.min_reports_age_days, 30);
        assert_eq!(cfg.archiver.max_to_archive, 5);
        assert!(!cfg.archiver.delete_after_archive);
        assert!(!cfg.archiver.delete_from_elastic);
        assert_eq!(cfg.archiver.worker_threads, 4);
        assert!(cfg.archiver.schedule.is_none());
        assert_eq!(cfg.reports_folder(), PathBuf::from("docRoot/reports"));
        assert_eq!(cfg.server.bind, "0.0.0.0:8081");
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_min_age_converts_days() {
        let section = ArchiverSection {
            min_reports_age_days: 2,
            ..Default::default()
        };
        assert_eq!(section.min_reports_age().num_milliseconds(), 2 * 86_400_000);
    }

    #[test]
    fn test_parse_example_toml() {
        let toml_str = r#"
[archiver]
enabled = true
remote_server = "http://reports.lab:9000"
min_reports_age_days = 7
max_to_archive = 20
delete_after_archive = true
delete_from_elastic = true
worker_threads = 8
schedule = "0 0 3 * * *"
request_timeout_secs = 15
download_dir = "/var/tmp/archiver"

[storage]
docroot = "/srv/difido/docRoot"
db_path = "/var/lib/report-archiver/meta.db"

[server]
bind = "127.0.0.1:9100"

[logging]
level = "debug"
json = true
"#;

        let cfg: ArchiverConfig = toml::from_str(toml_str).unwrap();

        assert!(cfg.archiver.enabled);
        assert_eq!(cfg.archiver.remote_server, "http://reports.lab:9000");
        assert_eq!(cfg.archiver.max_to_archive, 20);
        assert!(cfg.archiver.delete_after_archive);
        assert!(cfg.archiver.delete_from_elastic);
        assert_eq!(cfg.archiver.worker_threads, 8);
        assert_eq!(cfg.archiver.schedule.as_deref(), Some("0 0 3 * * *"));
        assert_eq!(cfg.archiver.request_timeout(), Duration::from_secs(15));
        assert_eq!(cfg.archiver.download_dir(), PathBuf::from("/var/tmp/archiver"));
        assert_eq!(
            cfg.reports_folder(),
            PathBuf::from("/srv/difido/docRoot/reports")
        );
        assert_eq!(cfg.server.bind, "127.0.0.1:9100");
        assert!(cfg.logging.json);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[archiver]
enabled = true
"#;

        let cfg: ArchiverConfig = toml::from_str(toml_str).unwrap();

        assert!(cfg.archiver.enabled);
        assert_eq!(cfg.archiver.max_to_archive, 5);
        assert_eq!(cfg.archiver.interval_secs, 3600);
        assert_eq!(cfg.storage.docroot, PathBuf::from("docRoot"));
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut cfg = ArchiverConfig::default();
        cfg.archiver.remote_server = "not a url".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidRemoteServer { .. })
        ));

        let mut cfg = ArchiverConfig::default();
        cfg.archiver.worker_threads = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::NoWorkers)));

        let mut cfg = ArchiverConfig::default();
        cfg.archiver.interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroInterval)));

        let mut cfg = ArchiverConfig::default();
        cfg.archiver.schedule = Some("every tuesday".to_string());
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidSchedule { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("archiver.toml");
        std::fs::write(
            &path,
            r#"
[archiver]
max_to_archive = 3
"#,
        )
        .unwrap();

        let cfg = ArchiverConfig::resolve(Some(&path)).unwrap();
        assert_eq!(cfg.archiver.max_to_archive, 3);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(ArchiverConfig::resolve(Some(&missing)).is_err());
    }
}
