//! Supervision unit models

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::deployment::DeploymentConfig;
use crate::models::host::HostProfile;

/// Lifecycle of the supervision unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceUnitState {
    Absent,
    Installed,
    Enabled,
    Running,
    Stopped,
    Failed,
}

impl fmt::Display for ServiceUnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceUnitState::Absent => "absent",
            ServiceUnitState::Installed => "installed",
            ServiceUnitState::Enabled => "enabled",
            ServiceUnitState::Running => "running",
            ServiceUnitState::Stopped => "stopped",
            ServiceUnitState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Everything needed to render the application's systemd unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnitSpec {
    pub service_name: String,
    pub description: String,
    pub user: String,
    pub working_dir: PathBuf,
    pub environment_file: PathBuf,
    /// Always a loopback address; the proxy is the only ingress
    pub bind: String,
    pub app_module: String,
    pub workers: u32,
    pub restart_interval: Duration,
}

impl ServiceUnitSpec {
    pub fn derive(config: &DeploymentConfig, profile: &HostProfile) -> Self {
        Self {
            service_name: config.service_name.clone(),
            description: format!("{} web application", config.service_name),
            user: config.service_user_for(profile).to_string(),
            working_dir: config.app_root_path.clone(),
            environment_file: config.app_root_path.join(".env"),
            bind: config.bind_address(),
            app_module: config.app_module.clone(),
            workers: config.workers,
            restart_interval: Duration::from_secs(10),
        }
    }

    fn venv_bin(&self) -> PathBuf {
        self.working_dir.join("venv").join("bin")
    }

    /// Render the unit file
    pub fn render(&self) -> String {
        let venv_bin = self.venv_bin();
        format!(
            "[Unit]\n\
             Description={description}\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             User={user}\n\
             Group={user}\n\
             WorkingDirectory={working_dir}\n\
             EnvironmentFile={env_file}\n\
             Environment=PATH={venv_bin}:/usr/bin:/bin\n\
             ExecStart={venv_bin}/gunicorn --workers {workers} --bind {bind} {module}\n\
             Restart=always\n\
             RestartSec={restart_sec}\n\
             \n\
             [Install]\n\
             WantedBy=multi-user.target\n",
            description = self.description,
            user = self.user,
            working_dir = self.working_dir.display(),
            env_file = self.environment_file.display(),
            venv_bin = venv_bin.display(),
            workers = self.workers,
            bind = self.bind,
            module = self.app_module,
            restart_sec = self.restart_interval.as_secs(),
        )
    }
}
