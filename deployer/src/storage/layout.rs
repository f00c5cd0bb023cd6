//! Host filesystem layout

use std::path::{Path, PathBuf};

use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Every host path the orchestrator touches, resolved under a root prefix.
///
/// Production runs use `/`; tests point the root at a scratch directory so
/// the same code paths run against a fake host tree.
#[derive(Debug, Clone)]
pub struct HostLayout {
    /// Root prefix for all host paths
    pub root: PathBuf,
}

impl HostLayout {
    /// Create a new host layout
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve an absolute host path under the root prefix
    pub fn resolve(&self, host_path: impl AsRef<Path>) -> PathBuf {
        let host_path = host_path.as_ref();
        match host_path.strip_prefix("/") {
            Ok(relative) => self.root.join(relative),
            Err(_) => self.root.join(host_path),
        }
    }

    /// os-release file used for distribution detection
    pub fn os_release_file(&self) -> File {
        File::new(self.resolve("/etc/os-release"))
    }

    /// systemd unit directory
    pub fn systemd_dir(&self) -> Dir {
        Dir::new(self.resolve("/etc/systemd/system"))
    }

    /// Unit file for the given service
    pub fn unit_file(&self, service_name: &str) -> File {
        self.systemd_dir().file(&format!("{}.service", service_name))
    }

    /// nginx configuration directory
    pub fn nginx_dir(&self) -> Dir {
        Dir::new(self.resolve("/etc/nginx"))
    }

    /// Top-level nginx configuration
    pub fn nginx_conf(&self) -> File {
        self.nginx_dir().file("nginx.conf")
    }

    /// Directory holding every rendered route generation
    pub fn sites_available_dir(&self) -> Dir {
        self.nginx_dir().subdir("sites-available")
    }

    /// Directory of active route references
    pub fn sites_enabled_dir(&self) -> Dir {
        self.nginx_dir().subdir("sites-enabled")
    }

    /// Drop-in directory included by stock RHEL nginx packages
    pub fn conf_d_dir(&self) -> Dir {
        self.nginx_dir().subdir("conf.d")
    }

    /// APT source definitions
    pub fn apt_sources_dir(&self) -> Dir {
        Dir::new(self.resolve("/etc/apt/sources.list.d"))
    }

    /// YUM repository definitions
    pub fn yum_repos_dir(&self) -> Dir {
        Dir::new(self.resolve("/etc/yum.repos.d"))
    }

    /// Orchestrator state directory
    pub fn state_dir(&self) -> Dir {
        Dir::new(self.resolve("/var/lib/appdeploy"))
    }

    /// Proxy staging directory
    pub fn staging_dir(&self) -> Dir {
        self.state_dir().subdir("staging")
    }

    /// Advisory lock held by mutating runs
    pub fn lock_file(&self) -> File {
        self.state_dir().file("appdeploy.lock")
    }

    /// Record of the most recent run
    pub fn last_run_file(&self) -> File {
        self.state_dir().file("last-run.json")
    }

    /// Pre-update snapshots
    pub fn backups_dir(&self) -> Dir {
        Dir::new(self.resolve("/var/backups/appdeploy"))
    }

    /// Default settings file
    pub fn settings_file(&self) -> File {
        File::new(self.resolve("/etc/appdeploy/settings.json"))
    }
}

impl Default for HostLayout {
    fn default() -> Self {
        Self::new("/")
    }
}
