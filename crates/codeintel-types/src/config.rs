//! Configuration loading for the code-intelligence worker.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives in the platform config directory
//! (e.g. `~/.config/codeintel-worker/config.toml`).

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::CodeIntelError;

const APP_NAME: &str = "codeintel-worker";

/// Settings for the upload-processing worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Interval between dequeue attempts of an idle handler.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of uploads processed concurrently.
    #[serde(default = "default_num_handlers")]
    pub num_handlers: usize,

    /// Byte budget shared by in-flight uploads. Values <= 0 disable the budget.
    #[serde(default)]
    pub maximum_upload_bytes: i64,

    /// Failed attempts after which an errored upload is no longer retried.
    #[serde(default = "default_max_num_retries")]
    pub max_num_retries: u32,

    /// Delay before an errored upload becomes eligible again.
    #[serde(default = "default_retry_after_secs")]
    pub retry_after_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_num_handlers() -> usize {
    4
}

fn default_max_num_retries() -> u32 {
    3
}

fn default_retry_after_secs() -> u64 {
    300
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            num_handlers: default_num_handlers(),
            maximum_upload_bytes: 0,
            max_num_retries: default_max_num_retries(),
            retry_after_secs: default_retry_after_secs(),
        }
    }
}

impl WorkerSettings {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be > 0".to_string());
        }
        if self.num_handlers == 0 {
            return Err("num_handlers must be > 0".to_string());
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_after(&self) -> Duration {
        Duration::from_secs(self.retry_after_secs)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB store
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory holding raw uploads awaiting processing
    #[serde(default = "default_upload_dir")]
    pub upload_dir: String,

    /// Base URL of the gitserver API
    #[serde(default = "default_gitserver_url")]
    pub gitserver_url: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub worker: WorkerSettings,
}

fn data_dir(name: &str) -> String {
    ProjectDirs::from("", "", APP_NAME)
        .map(|p| p.data_local_dir().join(name))
        .unwrap_or_else(|| PathBuf::from(".").join(name))
        .to_string_lossy()
        .to_string()
}

fn default_db_path() -> String {
    data_dir("db")
}

fn default_upload_dir() -> String {
    data_dir("uploads")
}

fn default_gitserver_url() -> String {
    "http://127.0.0.1:3178".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            upload_dir: default_upload_dir(),
            gitserver_url: default_gitserver_url(),
            log_level: default_log_level(),
            worker: WorkerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (platform config dir)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (CODEINTEL_*, nested keys joined with `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, CodeIntelError> {
        let config_dir = ProjectDirs::from("", "", APP_NAME)
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");
        let defaults = WorkerSettings::default();

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("upload_dir", default_upload_dir())
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("gitserver_url", default_gitserver_url())
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("worker.poll_interval_ms", defaults.poll_interval_ms)
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("worker.num_handlers", defaults.num_handlers as u64)
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("worker.maximum_upload_bytes", defaults.maximum_upload_bytes)
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("worker.max_num_retries", defaults.max_num_retries as u64)
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .set_default("worker.retry_after_secs", defaults.retry_after_secs)
            .map_err(|e| CodeIntelError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // CODEINTEL_DB_PATH, CODEINTEL_WORKER__NUM_HANDLERS, ...
        builder = builder.add_source(
            Environment::with_prefix("CODEINTEL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| CodeIntelError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| CodeIntelError::Config(e.to_string()))?;

        settings.worker.validate().map_err(CodeIntelError::Config)?;
        Ok(settings)
    }

    /// Expand ~ in a configured path to the home directory
    pub fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Some(home) = directories::BaseDirs::new().map(|d| d.home_dir().to_path_buf()) {
                return home.join(rest);
            }
        }
        PathBuf::from(path)
    }

    pub fn expanded_db_path(&self) -> PathBuf {
        Self::expand_path(&self.db_path)
    }

    pub fn expanded_upload_dir(&self) -> PathBuf {
        Self::expand_path(&self.upload_dir)
    }
}
