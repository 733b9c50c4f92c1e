//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Worker process launch settings.
///
/// The worker is the external automation process bound to one session; it
/// receives the session id and profile directory through environment
/// variables and trailing CLI arguments.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WorkerConfig {
    /// Worker binary (e.g. a scraper CLI or a wrapper script).
    pub command: String,
    /// Default arguments passed before the per-session arguments.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Manual-login provisioning flow settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProvisionConfig {
    /// Bootstrap binary that opens the login browser in a virtual display.
    pub command: String,
    /// Default arguments for the bootstrap binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Maximum time the operator has to complete the manual login.
    #[serde(default = "default_provision_seconds")]
    pub timeout_seconds: u64,
}

/// Configurable timeout values (seconds) for orchestration operations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Grace period between a stop request and a forced kill.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
    /// Maximum time a sequential-mode slot may run before the queue advances.
    #[serde(default = "default_sequential_slot_seconds")]
    pub sequential_slot_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
            sequential_slot_seconds: default_sequential_slot_seconds(),
        }
    }
}

fn default_provision_seconds() -> u64 {
    300
}

fn default_grace_seconds() -> u64 {
    10
}

fn default_sequential_slot_seconds() -> u64 {
    1800
}

fn default_http_port() -> u16 {
    5000
}

fn default_log_buffer() -> usize {
    1024
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding one browser profile directory per session.
    pub profiles_dir: PathBuf,
    /// Directory for the session database.
    pub data_dir: PathBuf,
    /// HTTP port for the control surface.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Per-subscriber live log channel capacity; a subscriber that falls
    /// further behind observes a lag marker instead of silent loss.
    #[serde(default = "default_log_buffer")]
    pub log_buffer: usize,
    /// Worker process settings.
    pub worker: WorkerConfig,
    /// Manual-login provisioning settings.
    pub provision: ProvisionConfig,
    /// Orchestration timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the `SQLite` session database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("sessions.db")
    }

    /// Grace period before a stop escalates to a forced kill.
    #[must_use]
    pub fn grace_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.grace_seconds)
    }

    /// Per-slot wall-clock budget for sequential mode.
    #[must_use]
    pub fn sequential_slot_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.sequential_slot_seconds)
    }

    /// Operator budget for completing a manual login.
    #[must_use]
    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision.timeout_seconds)
    }

    fn validate(&mut self) -> Result<()> {
        if self.worker.command.trim().is_empty() {
            return Err(AppError::Config("worker.command must not be empty".into()));
        }
        if self.provision.command.trim().is_empty() {
            return Err(AppError::Config(
                "provision.command must not be empty".into(),
            ));
        }
        if self.timeouts.grace_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.grace_seconds must be greater than zero".into(),
            ));
        }
        if self.timeouts.sequential_slot_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.sequential_slot_seconds must be greater than zero".into(),
            ));
        }
        if self.log_buffer == 0 {
            return Err(AppError::Config(
                "log_buffer must be greater than zero".into(),
            ));
        }

        self.profiles_dir = canonicalize_creating(&self.profiles_dir, "profiles_dir")?;
        self.data_dir = canonicalize_creating(&self.data_dir, "data_dir")?;

        Ok(())
    }
}

/// Create the directory if missing, then canonicalize it.
fn canonicalize_creating(path: &Path, field: &str) -> Result<PathBuf> {
    fs::create_dir_all(path)
        .map_err(|err| AppError::Config(format!("cannot create {field}: {err}")))?;
    path.canonicalize()
        .map_err(|err| AppError::Config(format!("{field} invalid: {err}")))
}
