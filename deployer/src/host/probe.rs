//! Host environment detection

use std::collections::HashMap;

use tracing::{debug, info};

use crate::errors::DeployError;
use crate::models::host::{HostProfile, OsFamily, PackageManagerKind, ProxyLayout};
use crate::storage::layout::HostLayout;

/// Read-only inspection of the host
#[derive(Debug, Clone)]
pub struct EnvironmentProbe {
    layout: HostLayout,
}

impl EnvironmentProbe {
    pub fn new(layout: HostLayout) -> Self {
        Self { layout }
    }

    /// Produce the host profile for this run.
    ///
    /// Fails with `UnsupportedHost` when the distribution cannot be mapped to
    /// a known family; nothing has been mutated at that point.
    pub async fn probe(&self) -> Result<HostProfile, DeployError> {
        let os_release = match self.layout.os_release_file().read_optional().await? {
            Some(contents) => parse_os_release(&contents),
            None => {
                debug!("No os-release file, falling back to sysinfo");
                let mut fields = HashMap::new();
                fields.insert("ID".to_string(), sysinfo::System::distribution_id());
                fields
            }
        };

        let distribution = os_release.get("ID").cloned().unwrap_or_default();
        let ids = std::iter::once(distribution.as_str()).chain(
            os_release
                .get("ID_LIKE")
                .map(|like| like.split_whitespace().collect::<Vec<_>>())
                .unwrap_or_default(),
        );

        let os_family = OsFamily::classify(ids);
        let package_manager = match os_family {
            OsFamily::DebianLike => PackageManagerKind::Apt,
            OsFamily::RhelLike => PackageManagerKind::Yum,
            OsFamily::Unknown => {
                return Err(DeployError::UnsupportedHost(format!(
                    "unrecognised distribution {:?}; supported families are Debian and RHEL",
                    distribution
                )))
            }
        };

        let proxy_layout = self.detect_proxy_layout().await;
        let profile = HostProfile {
            os_family,
            package_manager,
            proxy_layout,
            distribution,
            hostname: sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string()),
        };

        info!(
            "Host profile: {:?} via {} with proxy layout {:?}",
            profile.os_family, profile.package_manager, profile.proxy_layout
        );
        Ok(profile)
    }

    async fn detect_proxy_layout(&self) -> ProxyLayout {
        if self.layout.sites_available_dir().exists().await
            && self.layout.sites_enabled_dir().exists().await
        {
            ProxyLayout::SitesAvailableEnabled
        } else if self.layout.conf_d_dir().exists().await {
            ProxyLayout::ConfD
        } else {
            ProxyLayout::NeedsCreation
        }
    }
}

/// Parse os-release `KEY=value` lines, stripping optional quotes
pub fn parse_os_release(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .filter(|line| !line.trim_start().starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches('"').trim_matches('\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}
