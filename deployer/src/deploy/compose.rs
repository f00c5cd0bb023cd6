//! Docker Compose topology management

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::deployment::DeploymentConfig;
use crate::errors::DeployError;
use crate::system::runner::{CommandOutput, CommandRunner, Invocation};

/// Which compose frontend the host provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose` plugin
    Plugin,
    /// Standalone `docker-compose`
    Legacy,
}

/// Builds and runs the multi-container topology from the app root's
/// compose definition
pub struct ContainerOrchestrator {
    runner: Arc<dyn CommandRunner>,
    project_dir: PathBuf,
    variables: Vec<(String, String)>,
    flavor: OnceCell<ComposeFlavor>,
}

impl ContainerOrchestrator {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &DeploymentConfig) -> Self {
        let variables = vec![
            ("APP_PORT".to_string(), config.app_port.to_string()),
            ("HTTP_PORT".to_string(), config.http_port.to_string()),
            ("HTTPS_PORT".to_string(), config.https_port.to_string()),
            ("DOMAIN".to_string(), config.domain.clone()),
        ];
        Self {
            runner,
            project_dir: config.app_root_path.clone(),
            variables,
            flavor: OnceCell::new(),
        }
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Build images and bring the topology up
    pub async fn deploy(&self) -> Result<(), DeployError> {
        self.ensure_project().await?;
        info!("Deploying with Docker Compose in: {}", self.project_dir.display());
        self.compose_checked(&["up", "-d", "--build"]).await?;
        info!("Containers started");
        Ok(())
    }

    /// Tear down, rebuild and bring up again. Not zero-downtime.
    pub async fn update(&self) -> Result<(), DeployError> {
        self.ensure_project().await?;
        warn!("Updating containers; the service is unavailable until they are back up");
        self.down().await?;
        self.build().await?;
        self.compose_checked(&["up", "-d"]).await?;
        Ok(())
    }

    pub async fn build(&self) -> Result<(), DeployError> {
        self.compose_checked(&["build", "--pull"]).await.map(|_| ())
    }

    pub async fn down(&self) -> Result<(), DeployError> {
        self.compose_checked(&["down"]).await.map(|_| ())
    }

    pub async fn start(&self) -> Result<(), DeployError> {
        self.compose_checked(&["up", "-d"]).await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<(), DeployError> {
        self.compose_checked(&["stop"]).await.map(|_| ())
    }

    pub async fn restart(&self) -> Result<(), DeployError> {
        self.compose_checked(&["restart"]).await.map(|_| ())
    }

    /// `ps` listing of the topology
    pub async fn status(&self) -> Result<String, DeployError> {
        let output = self.compose_checked(&["ps"]).await?;
        Ok(output.stdout)
    }

    pub async fn logs(&self, lines: u32, follow: bool) -> Result<(), DeployError> {
        let tail = format!("--tail={}", lines);
        let mut args = vec!["logs", tail.as_str()];
        if follow {
            args.push("-f");
        }
        let invocation = self.invocation(&args).await;
        match self.runner.run_attached(&invocation).await? {
            Some(0) => Ok(()),
            code => Err(DeployError::ComposeError(format!("logs exited with {:?}", code))),
        }
    }

    async fn ensure_project(&self) -> Result<(), DeployError> {
        for name in ["docker-compose.yml", "docker-compose.yaml", "compose.yml", "compose.yaml"] {
            if tokio::fs::metadata(self.project_dir.join(name)).await.is_ok() {
                return Ok(());
            }
        }
        Err(DeployError::ComposeError(format!(
            "No compose definition in {}",
            self.project_dir.display()
        )))
    }

    async fn flavor(&self) -> ComposeFlavor {
        *self
            .flavor
            .get_or_init(|| async {
                let probe = Invocation::new("docker").args(["compose", "version"]);
                match self.runner.run(&probe).await {
                    Ok(output) if output.success() => ComposeFlavor::Plugin,
                    _ => {
                        debug!("docker compose plugin unavailable, using docker-compose");
                        ComposeFlavor::Legacy
                    }
                }
            })
            .await
    }

    async fn invocation(&self, args: &[&str]) -> Invocation {
        let base = match self.flavor().await {
            ComposeFlavor::Plugin => Invocation::new("docker").arg("compose"),
            ComposeFlavor::Legacy => Invocation::new("docker-compose"),
        };
        self.variables
            .iter()
            .fold(base.args(args.iter().copied()), |inv, (k, v)| inv.env(k.as_str(), v.as_str()))
            .current_dir(&self.project_dir)
    }

    async fn compose_checked(&self, args: &[&str]) -> Result<CommandOutput, DeployError> {
        let invocation = self.invocation(args).await;
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            return Err(DeployError::ComposeError(format!(
                "`{}` failed: {}",
                invocation,
                output.combined()
            )));
        }
        Ok(output)
    }
}
