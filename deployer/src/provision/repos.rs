//! Known-bad package repository repair

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Vendor hosts whose source definitions are known to break the package
/// manager on the hosts we target (unsigned or codename-mismatched nginx.org
/// mirrors left behind by manual installs).
const KNOWN_BAD_HOSTS: &[&str] = &["nginx.org/packages", "nginx.org/repo"];

/// Whether a source definition file is one we neutralise
pub fn is_known_bad_source(path: &Path, contents: &str) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let is_definition = [".list", ".sources", ".repo"]
        .iter()
        .any(|ext| name.ends_with(ext));

    is_definition
        && name.contains("nginx")
        && contents
            .lines()
            .filter(|line| !line.trim_start().starts_with('#'))
            .any(|line| KNOWN_BAD_HOSTS.iter().any(|host| line.contains(host)))
}

/// Remove known-bad source definitions from `dir`.
///
/// Returns the removed paths. Individual failures are reported as
/// `RepositoryRepair` so the caller can log them and carry on.
pub async fn remove_known_bad_sources(dir: &Dir) -> Result<Vec<PathBuf>, DeployError> {
    let mut removed = Vec::new();
    for path in dir.list_files().await? {
        let file = File::new(&path);
        let contents = match file.read_string().await {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Skipping unreadable source {}: {}", path.display(), e);
                continue;
            }
        };
        if !is_known_bad_source(&path, &contents) {
            continue;
        }

        file.delete().await.map_err(|e| {
            DeployError::RepositoryRepair(format!("could not remove {}: {}", path.display(), e))
        })?;
        info!("Removed problematic repository definition {}", path.display());
        removed.push(path);
    }
    Ok(removed)
}
