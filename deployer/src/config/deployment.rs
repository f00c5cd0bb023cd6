//! Deployment configuration and its validation

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::DeployError;
use crate::models::host::HostProfile;

pub const DEFAULT_DOMAIN: &str = "localhost";
pub const DEFAULT_APP_PORT: u32 = 5000;
pub const DEFAULT_HTTP_PORT: u32 = 80;
pub const DEFAULT_HTTPS_PORT: u32 = 443;
pub const DEFAULT_APP_ROOT: &str = "/opt/psyfind";
pub const DEFAULT_SERVICE_NAME: &str = "psyfind";
pub const DEFAULT_APP_MODULE: &str = "app:app";

/// Where the service runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    /// systemd + nginx directly on the host
    BareHost,
    /// docker compose topology
    Containerized,
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMode::BareHost => write!(f, "bare-host"),
            DeployMode::Containerized => write!(f, "container"),
        }
    }
}

impl std::str::FromStr for DeployMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bare" | "bare-host" | "host" | "systemd" => Ok(DeployMode::BareHost),
            "container" | "containerized" | "docker" | "compose" => Ok(DeployMode::Containerized),
            _ => Err(format!("Invalid deploy mode: {}", s)),
        }
    }
}

/// Unvalidated operator input.
///
/// Ports are carried wider than `u16` so out-of-range values surface as a
/// validation error rather than a parse error.
#[derive(Debug, Clone)]
pub struct DeploymentOptions {
    pub domain: String,
    pub app_port: u32,
    pub http_port: u32,
    pub https_port: u32,
    pub app_root: PathBuf,
    pub service_user: Option<String>,
    pub service_name: String,
    pub app_module: String,
    pub workers: u32,
    pub mode: DeployMode,
    pub tls_email: Option<String>,
    pub open_firewall: bool,
}

impl Default for DeploymentOptions {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            app_port: DEFAULT_APP_PORT,
            http_port: DEFAULT_HTTP_PORT,
            https_port: DEFAULT_HTTPS_PORT,
            app_root: PathBuf::from(DEFAULT_APP_ROOT),
            service_user: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            app_module: DEFAULT_APP_MODULE.to_string(),
            workers: 2,
            mode: DeployMode::BareHost,
            tls_email: None,
            open_firewall: false,
        }
    }
}

/// Validated deployment configuration, immutable for the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    pub domain: String,
    pub app_port: u16,
    pub http_port: u16,
    pub https_port: u16,
    pub app_root_path: PathBuf,
    pub service_user: Option<String>,
    pub service_name: String,
    pub app_module: String,
    pub workers: u32,
    pub mode: DeployMode,
    pub tls_email: Option<String>,
    pub open_firewall: bool,
}

impl DeploymentConfig {
    /// Validate operator input. Runs before any component touches the host.
    pub fn validate(options: DeploymentOptions) -> Result<Self, DeployError> {
        let app_port = check_port("APP_PORT", options.app_port)?;
        let http_port = check_port("HTTP_PORT", options.http_port)?;
        let https_port = check_port("HTTPS_PORT", options.https_port)?;

        let mut seen = HashSet::new();
        for (name, port) in [
            ("APP_PORT", app_port),
            ("HTTP_PORT", http_port),
            ("HTTPS_PORT", https_port),
        ] {
            if !seen.insert(port) {
                return Err(DeployError::ValidationError(format!(
                    "{}={} collides with another configured port",
                    name, port
                )));
            }
        }

        let domain = options.domain.trim().to_string();
        if domain.is_empty() {
            return Err(DeployError::ValidationError("DOMAIN must not be empty".to_string()));
        }
        if domain.chars().any(|c| c.is_whitespace() || c == '/' || c == ':') {
            return Err(DeployError::ValidationError(format!(
                "DOMAIN is not a host name: {:?}",
                domain
            )));
        }

        if options.service_name.is_empty()
            || !options
                .service_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(DeployError::ValidationError(format!(
                "Invalid service name: {:?}",
                options.service_name
            )));
        }

        if !options.app_root.is_absolute() {
            return Err(DeployError::ValidationError(format!(
                "APP_ROOT must be an absolute path: {}",
                options.app_root.display()
            )));
        }

        if options.workers == 0 {
            return Err(DeployError::ValidationError(
                "Worker count must be at least 1".to_string(),
            ));
        }

        let config = Self {
            domain,
            app_port,
            http_port,
            https_port,
            app_root_path: options.app_root,
            service_user: options.service_user.filter(|u| !u.trim().is_empty()),
            service_name: options.service_name,
            app_module: options.app_module,
            workers: options.workers,
            mode: options.mode,
            tls_email: options.tls_email.filter(|e| !e.trim().is_empty()),
            open_firewall: options.open_firewall,
        };

        // The domain must also produce a usable URL
        config.access_url()?;
        Ok(config)
    }

    /// Account the service runs as on the given host
    pub fn service_user_for<'a>(&'a self, profile: &HostProfile) -> &'a str {
        self.service_user
            .as_deref()
            .unwrap_or_else(|| profile.default_service_user())
    }

    /// Whether a certificate should be requested for the domain
    pub fn wants_tls(&self) -> bool {
        self.tls_email.is_some() && self.domain != DEFAULT_DOMAIN
    }

    /// Externally reachable URL of the service (via the proxy)
    pub fn access_url(&self) -> Result<Url, DeployError> {
        let raw = format!("http://{}:{}/", self.domain, self.http_port);
        Url::parse(&raw)
            .map_err(|e| DeployError::ValidationError(format!("Invalid access URL {}: {}", raw, e)))
    }

    /// Health route behind the proxy on the external HTTP port
    pub fn health_url(&self) -> Result<Url, DeployError> {
        self.access_url()?
            .join("health")
            .map_err(|e| DeployError::ValidationError(e.to_string()))
    }

    /// Unit-level bind address; never a wildcard
    pub fn bind_address(&self) -> String {
        format!("127.0.0.1:{}", self.app_port)
    }
}

fn check_port(name: &str, port: u32) -> Result<u16, DeployError> {
    if port == 0 || port > u16::MAX as u32 {
        return Err(DeployError::ValidationError(format!(
            "{}={} is outside 1-65535",
            name, port
        )));
    }
    Ok(port as u16)
}
