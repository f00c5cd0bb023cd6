//! systemd unit lifecycle

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::file::File;
use crate::models::unit::{ServiceUnitSpec, ServiceUnitState};
use crate::storage::layout::HostLayout;
use crate::system::runner::{CommandOutput, CommandRunner, Invocation};

/// Enablement and activity seen before a run touched the unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorActivity {
    pub enabled: bool,
    pub active: bool,
}

/// Manages supervision of the application process.
///
/// Start and restart return once systemd accepted the job; whether the
/// process actually serves requests is the health check's concern.
pub struct ServiceUnitManager {
    runner: Arc<dyn CommandRunner>,
    unit_file: File,
    service_name: String,
    state: ServiceUnitState,
    /// Unit contents before the last `install` (`None` = no unit existed)
    replaced: Option<Option<String>>,
    prior: PriorActivity,
}

impl ServiceUnitManager {
    /// Open the manager, deriving the initial state from disk
    pub async fn open(
        runner: Arc<dyn CommandRunner>,
        layout: &HostLayout,
        service_name: &str,
    ) -> Self {
        let unit_file = layout.unit_file(service_name);
        let state = if unit_file.exists().await {
            ServiceUnitState::Installed
        } else {
            ServiceUnitState::Absent
        };
        Self {
            runner,
            unit_file,
            service_name: service_name.to_string(),
            state,
            replaced: None,
            prior: PriorActivity::default(),
        }
    }

    /// Last known state
    pub fn state(&self) -> ServiceUnitState {
        self.state
    }

    pub fn unit_file(&self) -> &File {
        &self.unit_file
    }

    /// Remember whether the unit was enabled and running, so undoing this
    /// run puts it back the way it was
    pub async fn record_prior(&mut self) -> Result<PriorActivity, DeployError> {
        self.prior = if self.unit_file.exists().await {
            let enabled = self.systemctl(&["is-enabled", self.service_name.as_str()]).await?;
            let active = self.systemctl(&["is-active", self.service_name.as_str()]).await?;
            PriorActivity {
                enabled: enabled.stdout.trim() == "enabled",
                active: is_active(&active.stdout),
            }
        } else {
            PriorActivity::default()
        };
        debug!("Unit {} before run: {:?}", self.service_name, self.prior);
        Ok(self.prior)
    }

    pub fn prior(&self) -> PriorActivity {
        self.prior
    }

    /// Write the unit if its content changed, then reload systemd
    pub async fn install(&mut self, spec: &ServiceUnitSpec) -> Result<bool, DeployError> {
        let rendered = spec.render();
        let current = self
            .unit_file
            .read_optional()
            .await
            .map_err(|e| DeployError::UnitInstall(e.to_string()))?;

        if current.as_deref() == Some(rendered.as_str()) {
            debug!("Unit {} unchanged", self.unit_file.path().display());
            if self.state == ServiceUnitState::Absent {
                self.state = ServiceUnitState::Installed;
            }
            return Ok(false);
        }

        self.unit_file
            .write_atomic(rendered.as_bytes())
            .await
            .map_err(|e| DeployError::UnitInstall(format!("{}: {}", self.unit_file.path().display(), e)))?;
        self.replaced = Some(current);

        let output = self.systemctl(&["daemon-reload"]).await?;
        if !output.success() {
            return Err(DeployError::UnitInstall(format!(
                "daemon-reload failed: {}",
                output.combined()
            )));
        }

        if self.state == ServiceUnitState::Absent {
            self.state = ServiceUnitState::Installed;
        }
        info!("Installed unit {}", self.unit_file.path().display());
        Ok(true)
    }

    /// Undo the last `install`: restore the previous unit or remove ours.
    ///
    /// A restored unit that was running before is restarted so the old
    /// definition is the one serving again.
    pub async fn uninstall(&mut self) -> Result<(), DeployError> {
        let restored = match self.replaced.take() {
            Some(Some(previous)) => {
                self.unit_file.write_atomic(previous.as_bytes()).await?;
                info!("Restored previous unit {}", self.unit_file.path().display());
                true
            }
            Some(None) => {
                self.unit_file.delete().await?;
                self.state = ServiceUnitState::Absent;
                info!("Removed unit {}", self.unit_file.path().display());
                false
            }
            None => return Ok(()),
        };
        let _ = self.systemctl(&["daemon-reload"]).await?;
        if restored && self.prior.active {
            self.restart().await?;
        }
        Ok(())
    }

    /// Undo `start`. A unit that was running before the run stays up.
    pub async fn undo_start(&mut self) -> Result<(), DeployError> {
        if self.prior.active {
            debug!("{} was running before, leaving it up", self.service_name);
            return Ok(());
        }
        self.stop().await
    }

    /// Undo `set_enabled(true)` unless the unit was already enabled
    pub async fn undo_enable(&mut self) -> Result<(), DeployError> {
        if self.prior.enabled {
            debug!("{} was enabled before, keeping it", self.service_name);
            return Ok(());
        }
        self.set_enabled(false).await
    }

    /// Enable or disable start at boot
    pub async fn set_enabled(&mut self, enabled: bool) -> Result<(), DeployError> {
        let action = if enabled { "enable" } else { "disable" };
        self.control(action).await?;
        match (enabled, self.state) {
            (true, ServiceUnitState::Installed) => self.state = ServiceUnitState::Enabled,
            (false, ServiceUnitState::Enabled) => self.state = ServiceUnitState::Installed,
            _ => {}
        }
        Ok(())
    }

    pub async fn start(&mut self) -> Result<(), DeployError> {
        self.control("start").await?;
        self.state = ServiceUnitState::Running;
        Ok(())
    }

    /// Stop the unit. Stopping an absent or stopped unit succeeds.
    pub async fn stop(&mut self) -> Result<(), DeployError> {
        if !self.unit_file.exists().await {
            debug!("Unit {} not installed, nothing to stop", self.service_name);
            self.state = ServiceUnitState::Absent;
            return Ok(());
        }
        self.control("stop").await?;
        self.state = ServiceUnitState::Stopped;
        Ok(())
    }

    pub async fn restart(&mut self) -> Result<(), DeployError> {
        self.control("restart").await?;
        self.state = ServiceUnitState::Running;
        Ok(())
    }

    /// Query systemd for the unit's current state
    pub async fn status(&mut self) -> Result<ServiceUnitState, DeployError> {
        if !self.unit_file.exists().await {
            self.state = ServiceUnitState::Absent;
            return Ok(self.state);
        }

        let active = self.systemctl(&["is-active", self.service_name.as_str()]).await?;
        self.state = match active.stdout.trim() {
            _ if is_active(&active.stdout) => ServiceUnitState::Running,
            "failed" => ServiceUnitState::Failed,
            _ => match self.state {
                ServiceUnitState::Running | ServiceUnitState::Stopped | ServiceUnitState::Failed => {
                    ServiceUnitState::Stopped
                }
                _ => {
                    let enabled = self
                        .systemctl(&["is-enabled", self.service_name.as_str()])
                        .await?;
                    if enabled.stdout.trim() == "enabled" {
                        ServiceUnitState::Enabled
                    } else {
                        ServiceUnitState::Installed
                    }
                }
            },
        };
        Ok(self.state)
    }

    /// Show the unit's journal
    pub async fn logs(&self, lines: u32, follow: bool) -> Result<(), DeployError> {
        let mut journal = Invocation::new("journalctl")
            .args(["-u", self.service_name.as_str(), "--no-pager", "-n"])
            .arg(lines.to_string());
        if follow {
            journal = journal.arg("-f");
        }
        match self.runner.run_attached(&journal).await? {
            Some(0) => Ok(()),
            code => Err(DeployError::UnitControl {
                action: "logs".to_string(),
                detail: format!("journalctl exited with {:?}", code),
            }),
        }
    }

    async fn control(&self, action: &str) -> Result<(), DeployError> {
        let output = self.systemctl(&[action, self.service_name.as_str()]).await?;
        if !output.success() {
            warn!("systemctl {} {} failed", action, self.service_name);
            return Err(DeployError::UnitControl {
                action: action.to_string(),
                detail: output.combined(),
            });
        }
        info!("systemctl {} {}", action, self.service_name);
        Ok(())
    }

    async fn systemctl(&self, args: &[&str]) -> Result<CommandOutput, DeployError> {
        self.runner
            .run(&Invocation::new("systemctl").args(args.iter().copied()))
            .await
    }
}

fn is_active(is_active_output: &str) -> bool {
    matches!(is_active_output.trim(), "active" | "activating" | "reloading")
}
