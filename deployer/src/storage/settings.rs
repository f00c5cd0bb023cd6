//! Settings file management

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Orchestrator settings.
///
/// Operator-tunable knobs that are not part of a deployment's identity. The
/// file is optional; every field falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Console log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit console logs as JSON
    #[serde(default)]
    pub json_logs: bool,

    /// Directory for the persistent run log
    #[serde(default = "default_log_dir")]
    pub log_dir: Option<String>,

    /// Health verification tuning
    #[serde(default)]
    pub health: HealthSettings,
}

fn default_log_dir() -> Option<String> {
    Some("/var/log/appdeploy".to_string())
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            json_logs: false,
            log_dir: default_log_dir(),
            health: HealthSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `file`, using defaults when it does not exist
    pub async fn load_or_default(file: &File) -> Result<Self, DeployError> {
        if !file.exists().await {
            return Ok(Self::default());
        }
        file.read_json().await.map_err(|e| {
            DeployError::ConfigError(format!(
                "Invalid settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    /// Number of probes before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Seconds between probes
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    30
}

fn default_interval_secs() -> u64 {
    2
}

fn default_request_timeout_secs() -> u64 {
    5
}

impl HealthSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}
