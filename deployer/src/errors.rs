//! Error types for the deployment orchestrator

use thiserror::Error;

/// Main error type for appdeploy
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Unsupported host: {0}")]
    UnsupportedHost(String),

    #[error("Package installation with {manager} failed (exit code {exit_code:?})")]
    PackageInstall {
        manager: String,
        exit_code: Option<i32>,
    },

    #[error("Repository repair warning: {0}")]
    RepositoryRepair(String),

    #[error("Failed to install service unit: {0}")]
    UnitInstall(String),

    #[error("Service unit {action} failed: {detail}")]
    UnitControl { action: String, detail: String },

    #[error("Reverse proxy configuration rejected by validator:\n{tool_output}")]
    ProxyValidation { tool_output: String },

    #[error("Reverse proxy error: {0}")]
    ProxyError(String),

    #[error("Health check did not succeed after {attempts} attempts at {url}")]
    HealthCheckTimeout { url: String, attempts: u32 },

    #[error("Container orchestration error: {0}")]
    ComposeError(String),

    #[error("Command error: {0}")]
    CommandError(String),

    #[error("Snapshot error: {0}")]
    SnapshotError(String),

    #[error("Source refresh error: {0}")]
    SourceError(String),

    #[error("Another deployment run holds the lock: {0}")]
    LockError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid state transition: {0}")]
    TransitionError(String),

    #[error("Command '{command}' is not available in {mode} mode")]
    UnsupportedCommand { command: String, mode: String },
}

impl DeployError {
    /// Warnings are reported but never abort a run
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            DeployError::HealthCheckTimeout { .. } | DeployError::RepositoryRepair(_)
        )
    }
}
