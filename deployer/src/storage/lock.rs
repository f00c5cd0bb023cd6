//! Advisory run lock

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::DeployError;
use crate::filesys::file::File;

/// Held for the duration of a mutating run; the lock file is removed on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Acquire the lock, failing fast if another run holds it
    pub async fn acquire(lock_file: &File) -> Result<Self, DeployError> {
        let path = lock_file.path().to_path_buf();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = lock_file.read_string().await.unwrap_or_default();
                return Err(DeployError::LockError(format!(
                    "{} exists ({}); remove it if no other run is active",
                    path.display(),
                    holder.trim()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let holder = format!("pid={} at={}", std::process::id(), chrono::Utc::now().to_rfc3339());
        file.write_all(holder.as_bytes()).await?;
        debug!("Acquired run lock {}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}
