//! Point-in-time copies of the application root

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::errors::DeployError;
use crate::filesys::dir::Dir;

/// Timestamped snapshots under the backups directory.
///
/// Snapshots are never restored automatically; the operator copies one back
/// by hand if an update leaves the service broken.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    backups: Dir,
}

impl SnapshotStore {
    pub fn new(backups: Dir) -> Self {
        Self { backups }
    }

    /// Copy `app_root` to `<backups>/<service>-<timestamp>`
    pub async fn take(&self, app_root: &Path, service_name: &str) -> Result<PathBuf, DeployError> {
        let source = Dir::new(app_root);
        if !source.exists().await {
            return Err(DeployError::SnapshotError(format!(
                "{} does not exist",
                app_root.display()
            )));
        }

        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
        let target = self.backups.subdir(&format!("{}-{}", service_name, stamp));
        if target.exists().await {
            return Err(DeployError::SnapshotError(format!(
                "{} already exists",
                target.path().display()
            )));
        }

        let copied = source
            .copy_to(&target)
            .await
            .map_err(|e| DeployError::SnapshotError(format!("copy failed: {}", e)))?;
        info!(
            "Snapshot of {} ({} files) at {}",
            app_root.display(),
            copied,
            target.path().display()
        );
        Ok(target.path().to_path_buf())
    }

    /// Snapshots for `service_name`, oldest first
    pub async fn list(&self, service_name: &str) -> Result<Vec<PathBuf>, DeployError> {
        let mut snapshots = Vec::new();
        if !self.backups.exists().await {
            return Ok(snapshots);
        }
        let prefix = format!("{}-", service_name);
        let mut entries = tokio::fs::read_dir(self.backups.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let is_match = entry.file_name().to_string_lossy().starts_with(&prefix);
            if is_match && entry.file_type().await?.is_dir() {
                snapshots.push(entry.path());
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }
}
