//! System package provisioning

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::models::host::{HostProfile, PackageManagerKind};
use crate::provision::repos::remove_known_bad_sources;
use crate::storage::layout::HostLayout;
use crate::system::runner::{CommandRunner, Invocation};

/// Packages the service topology needs on each family
pub fn default_packages(kind: PackageManagerKind) -> Vec<String> {
    let packages: &[&str] = match kind {
        PackageManagerKind::Apt => &["python3", "python3-venv", "python3-pip", "nginx", "git", "curl"],
        PackageManagerKind::Yum => &["python3", "python3-pip", "nginx", "git", "curl"],
    };
    packages.iter().map(|p| p.to_string()).collect()
}

/// Capability implemented once per package manager
#[async_trait]
pub trait PackageBackend: Send + Sync {
    fn kind(&self) -> PackageManagerKind;

    /// Packages from `packages` that are not installed yet
    async fn missing(&self, runner: &dyn CommandRunner, packages: &[String]) -> Vec<String>;

    /// Install `packages` in a single transaction
    async fn install(&self, runner: &dyn CommandRunner, packages: &[String]) -> Result<(), DeployError>;

    /// Neutralise known-bad repository definitions
    async fn repair(&self, layout: &HostLayout) -> Result<Vec<PathBuf>, DeployError>;
}

/// Debian family backend
#[derive(Debug, Default)]
pub struct AptBackend;

#[async_trait]
impl PackageBackend for AptBackend {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Apt
    }

    async fn missing(&self, runner: &dyn CommandRunner, packages: &[String]) -> Vec<String> {
        let mut missing = Vec::new();
        for package in packages {
            let query = Invocation::new("dpkg-query").args(["-W", "-f=${Status}", package.as_str()]);
            let installed = runner
                .run(&query)
                .await
                .map(|out| out.success() && out.stdout.contains("install ok installed"))
                .unwrap_or(false);
            if !installed {
                missing.push(package.clone());
            }
        }
        missing
    }

    async fn install(&self, runner: &dyn CommandRunner, packages: &[String]) -> Result<(), DeployError> {
        let update = Invocation::new("apt-get")
            .args(["update", "-q"])
            .env("DEBIAN_FRONTEND", "noninteractive");
        let output = runner.run(&update).await?;
        if !output.success() {
            warn!("apt-get update failed:\n{}", output.combined());
            return Err(DeployError::PackageInstall {
                manager: self.kind().to_string(),
                exit_code: output.exit_code,
            });
        }

        let install = Invocation::new("apt-get")
            .args(["install", "-y", "-q"])
            .args(packages.iter().cloned())
            .env("DEBIAN_FRONTEND", "noninteractive");
        check_install(self.kind(), runner, &install).await
    }

    async fn repair(&self, layout: &HostLayout) -> Result<Vec<PathBuf>, DeployError> {
        remove_known_bad_sources(&layout.apt_sources_dir()).await
    }
}

/// RHEL family backend
#[derive(Debug, Default)]
pub struct YumBackend;

#[async_trait]
impl PackageBackend for YumBackend {
    fn kind(&self) -> PackageManagerKind {
        PackageManagerKind::Yum
    }

    async fn missing(&self, runner: &dyn CommandRunner, packages: &[String]) -> Vec<String> {
        let mut missing = Vec::new();
        for package in packages {
            let query = Invocation::new("rpm").args(["-q", package.as_str()]);
            let installed = runner.run(&query).await.map(|out| out.success()).unwrap_or(false);
            if !installed {
                missing.push(package.clone());
            }
        }
        missing
    }

    async fn install(&self, runner: &dyn CommandRunner, packages: &[String]) -> Result<(), DeployError> {
        let install = Invocation::new("yum")
            .args(["install", "-y", "-q"])
            .args(packages.iter().cloned());
        check_install(self.kind(), runner, &install).await
    }

    async fn repair(&self, layout: &HostLayout) -> Result<Vec<PathBuf>, DeployError> {
        remove_known_bad_sources(&layout.yum_repos_dir()).await
    }
}

async fn check_install(
    kind: PackageManagerKind,
    runner: &dyn CommandRunner,
    invocation: &Invocation,
) -> Result<(), DeployError> {
    info!("Installing packages with {}: {}", kind, invocation.args.join(" "));
    let output = runner.run(invocation).await?;
    if !output.success() {
        warn!("{} failed:\n{}", invocation.program, output.combined());
        return Err(DeployError::PackageInstall {
            manager: kind.to_string(),
            exit_code: output.exit_code,
        });
    }
    Ok(())
}

/// Select the backend for the probed host
pub fn backend_for(profile: &HostProfile) -> Box<dyn PackageBackend> {
    match profile.package_manager {
        PackageManagerKind::Apt => Box::new(AptBackend),
        PackageManagerKind::Yum => Box::new(YumBackend),
    }
}

/// Result of a provisioning pass
#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    /// Packages that had to be installed
    pub installed: Vec<String>,
    /// Repository definitions removed by the repair pre-step
    pub repaired: Vec<PathBuf>,
    /// Non-fatal problems
    pub warnings: Vec<String>,
}

/// Ensures required system packages are present
pub struct PackageProvisioner {
    runner: Arc<dyn CommandRunner>,
    layout: HostLayout,
}

impl PackageProvisioner {
    pub fn new(runner: Arc<dyn CommandRunner>, layout: HostLayout) -> Self {
        Self { runner, layout }
    }

    /// Best-effort repository repair; never fails the run
    pub async fn repair_known_bad_repositories(&self, profile: &HostProfile) -> ProvisionReport {
        let backend = backend_for(profile);
        let mut report = ProvisionReport::default();
        match backend.repair(&self.layout).await {
            Ok(removed) => {
                if removed.is_empty() {
                    debug!("No problematic repositories found");
                }
                report.repaired = removed;
            }
            Err(e) => {
                warn!("Repository repair skipped: {}", e);
                report.warnings.push(e.to_string());
            }
        }
        report
    }

    /// Repair repositories, then install whatever is missing in one transaction
    pub async fn ensure(
        &self,
        packages: &[String],
        profile: &HostProfile,
    ) -> Result<ProvisionReport, DeployError> {
        let mut report = self.repair_known_bad_repositories(profile).await;
        let backend = backend_for(profile);

        let missing = backend.missing(self.runner.as_ref(), packages).await;
        if missing.is_empty() {
            info!("All {} required packages already installed", packages.len());
            return Ok(report);
        }

        backend.install(self.runner.as_ref(), &missing).await?;
        report.installed = missing;
        Ok(report)
    }
}
