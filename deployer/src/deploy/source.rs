//! Application sources and Python dependencies

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::system::runner::{CommandRunner, Invocation};

/// Keeps the application checkout and its virtualenv current
pub struct SourceRefresher {
    runner: Arc<dyn CommandRunner>,
    app_root: PathBuf,
}

impl SourceRefresher {
    pub fn new(runner: Arc<dyn CommandRunner>, app_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            app_root: app_root.into(),
        }
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.app_root.join("venv")
    }

    /// Pull then reinstall dependencies
    pub async fn refresh(&self) -> Result<(), DeployError> {
        self.pull().await?;
        self.prepare_dependencies().await
    }

    /// Fast-forward the checkout. Returns false when the app root is not a
    /// git working tree.
    pub async fn pull(&self) -> Result<bool, DeployError> {
        if !exists(&self.app_root.join(".git")).await {
            debug!("{} is not a git checkout, skipping pull", self.app_root.display());
            return Ok(false);
        }

        info!("Pulling latest sources in {}", self.app_root.display());
        let pull = Invocation::new("git")
            .args(["pull", "--ff-only"])
            .current_dir(&self.app_root);
        self.run_checked(&pull).await?;
        Ok(true)
    }

    /// Create the virtualenv if needed and install requirements plus the
    /// WSGI server into it
    pub async fn prepare_dependencies(&self) -> Result<(), DeployError> {
        let venv = self.venv_dir();
        if !exists(&venv.join("bin").join("python")).await {
            info!("Creating virtualenv {}", venv.display());
            let create = Invocation::new("python3")
                .args(["-m", "venv"])
                .arg(venv.to_string_lossy())
                .current_dir(&self.app_root);
            self.run_checked(&create).await?;
        }

        let pip = venv.join("bin").join("pip").to_string_lossy().into_owned();
        let requirements = self.app_root.join("requirements.txt");
        if exists(&requirements).await {
            let install = Invocation::new(pip.as_str())
                .args(["install", "-q", "-r"])
                .arg(requirements.to_string_lossy())
                .current_dir(&self.app_root);
            self.run_checked(&install).await?;
        } else {
            debug!("No requirements.txt in {}", self.app_root.display());
        }

        let gunicorn = Invocation::new(pip.as_str())
            .args(["install", "-q", "gunicorn"])
            .current_dir(&self.app_root);
        self.run_checked(&gunicorn).await?;
        info!("Dependencies installed into {}", venv.display());
        Ok(())
    }

    async fn run_checked(&self, invocation: &Invocation) -> Result<(), DeployError> {
        let output = self.runner.run(invocation).await?;
        if !output.success() {
            return Err(DeployError::SourceError(format!(
                "`{}` failed: {}",
                invocation,
                output.combined()
            )));
        }
        Ok(())
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
