//! nginx virtual host management

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::DeployError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::host::{HostProfile, ProxyLayout};
use crate::models::route::{ProxyRoute, ProxyRouteState};
use crate::storage::layout::HostLayout;
use crate::system::runner::{CommandRunner, Invocation};
use crate::utils::sha256_hash;

/// What occupied the enabled path before we touched it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnabledReference {
    Missing,
    Link(PathBuf),
    Regular(String),
}

impl EnabledReference {
    pub async fn capture(file: &File) -> Result<Self, DeployError> {
        if let Some(target) = file.link_target().await {
            return Ok(EnabledReference::Link(target));
        }
        match file.read_optional().await? {
            Some(contents) => Ok(EnabledReference::Regular(contents)),
            None => Ok(EnabledReference::Missing),
        }
    }

    pub async fn restore(&self, file: &File) -> Result<(), DeployError> {
        match self {
            EnabledReference::Missing => file.delete().await,
            EnabledReference::Link(target) => file.symlink_to(target).await,
            EnabledReference::Regular(contents) => file.write_atomic(contents.as_bytes()).await,
        }
    }
}

/// Directories a route moves through for a given layout
#[derive(Debug, Clone)]
struct RouteDirs {
    available: Dir,
    enabled: Dir,
}

/// Renders, validates and activates the service's virtual host
pub struct ReverseProxyConfigurer {
    runner: Arc<dyn CommandRunner>,
    layout: HostLayout,
    /// Reference replaced by the last successful `apply`
    replaced: Option<(File, EnabledReference)>,
}

impl ReverseProxyConfigurer {
    pub fn new(runner: Arc<dyn CommandRunner>, layout: HostLayout) -> Self {
        Self {
            runner,
            layout,
            replaced: None,
        }
    }

    fn dirs_for(&self, proxy_layout: ProxyLayout) -> RouteDirs {
        let enabled = match proxy_layout {
            ProxyLayout::ConfD => self.layout.conf_d_dir(),
            ProxyLayout::SitesAvailableEnabled | ProxyLayout::NeedsCreation => {
                self.layout.sites_enabled_dir()
            }
        };
        RouteDirs {
            available: self.layout.sites_available_dir(),
            enabled,
        }
    }

    /// Enabled reference path for `route` on this host
    pub fn enabled_file(&self, route: &ProxyRoute, profile: &HostProfile) -> File {
        self.dirs_for(profile.proxy_layout)
            .enabled
            .file(&route.enabled_name())
    }

    /// Activate `route`.
    ///
    /// The route is only linked into the active set for as long as it takes
    /// the validator to judge the merged configuration; a rejected route is
    /// unlinked again and whatever was active before is put back untouched.
    pub async fn apply(
        &mut self,
        route: &mut ProxyRoute,
        profile: &HostProfile,
    ) -> Result<(), DeployError> {
        // 1. Render into staging
        let rendered = route.render();
        let digest = sha256_hash(rendered.as_bytes());
        let generation = format!("{}.{}.conf", route.service_name, &digest[..12]);
        let staged = self.layout.staging_dir().file(&generation);
        staged.write_string(&rendered).await?;
        route.state = ProxyRouteState::Rendered;
        debug!("Rendered route to {}", staged.path().display());

        // 2. Directory layout
        let dirs = self.dirs_for(profile.proxy_layout);
        dirs.available.create().await?;
        dirs.enabled.create().await?;
        if profile.proxy_layout == ProxyLayout::NeedsCreation {
            self.ensure_include(&dirs.enabled).await?;
        }

        // 3. Place and link
        let available = staged.rename_to(&dirs.available.path().join(&generation)).await?;
        let enabled = dirs.enabled.file(&route.enabled_name());
        let previous = EnabledReference::capture(&enabled).await?;
        enabled.symlink_to(available.path()).await?;

        // 4. Validate the merged configuration
        if let Err(e) = self.validate().await {
            previous.restore(&enabled).await?;
            warn!(
                "Route rejected; {} left for inspection",
                available.path().display()
            );
            return Err(e);
        }
        route.state = ProxyRouteState::Validated;

        // 5. Reload the live proxy
        if let Err(e) = self.reload().await {
            previous.restore(&enabled).await?;
            return Err(e);
        }
        route.state = ProxyRouteState::Active;

        if profile.proxy_layout != ProxyLayout::ConfD {
            self.disable_default_site(&dirs.enabled).await;
        }
        self.replaced = Some((enabled, previous));
        info!("Route {} active for {}", generation, route.domain);
        Ok(())
    }

    /// Put back the reference replaced by the last `apply` and reload
    pub async fn revert(&mut self) -> Result<(), DeployError> {
        let Some((enabled, previous)) = self.replaced.take() else {
            return Ok(());
        };
        previous.restore(&enabled).await?;
        self.validate().await?;
        self.reload().await?;
        info!("Restored previous route at {}", enabled.path().display());
        Ok(())
    }

    /// Whether the live proxy unit is running
    pub async fn is_running(&self) -> bool {
        self.runner
            .run(&Invocation::new("systemctl").args(["is-active", "nginx"]))
            .await
            .map(|out| out.stdout.trim() == "active")
            .unwrap_or(false)
    }

    /// Run nginx's own syntax check against the full configuration
    pub async fn validate(&self) -> Result<(), DeployError> {
        let conf = self.layout.nginx_conf();
        let check = Invocation::new("nginx")
            .args(["-t", "-c"])
            .arg(conf.path().to_string_lossy());
        let output = self.runner.run(&check).await?;
        if !output.success() {
            return Err(DeployError::ProxyValidation {
                tool_output: output.combined(),
            });
        }
        debug!("nginx configuration valid");
        Ok(())
    }

    async fn reload(&self) -> Result<(), DeployError> {
        let output = self
            .runner
            .run(&Invocation::new("systemctl").args(["reload-or-restart", "nginx"]))
            .await?;
        if !output.success() {
            return Err(DeployError::ProxyError(format!(
                "nginx reload failed: {}",
                output.combined()
            )));
        }
        Ok(())
    }

    /// Include the enabled directory from nginx.conf, at most once
    async fn ensure_include(&self, enabled: &Dir) -> Result<(), DeployError> {
        let conf = self.layout.nginx_conf();
        let contents = conf.read_optional().await?.ok_or_else(|| {
            DeployError::ProxyError(format!("{} not found; is nginx installed?", conf.path().display()))
        })?;

        let pattern = format!("{}/*", enabled.path().display());
        if contents.contains(&pattern) {
            debug!("nginx.conf already includes {}", pattern);
            return Ok(());
        }

        let patched = insert_include(&contents, &pattern).ok_or_else(|| {
            DeployError::ProxyError(format!("no http block in {}", conf.path().display()))
        })?;
        conf.write_atomic(patched.as_bytes()).await?;
        info!("Added include {} to {}", pattern, conf.path().display());
        Ok(())
    }

    /// Drop the distribution's default site once our route is live. The link
    /// is put back if nginx will not reload without it.
    async fn disable_default_site(&self, enabled: &Dir) {
        let default_site = enabled.file("default");
        let Some(target) = default_site.link_target().await else {
            return;
        };
        if let Err(e) = default_site.delete().await {
            warn!("Could not disable default site: {}", e);
            return;
        }
        match self.reload().await {
            Ok(()) => info!("Disabled distribution default site"),
            Err(e) => {
                warn!("Reload without default site failed, restoring it: {}", e);
                if let Err(e) = default_site.symlink_to(&target).await {
                    warn!("Could not restore default site: {}", e);
                }
            }
        }
    }
}

/// Insert an include directive on the line after the opening of the http block
pub fn insert_include(contents: &str, pattern: &str) -> Option<String> {
    let mut out = String::with_capacity(contents.len() + pattern.len() + 16);
    let mut inserted = false;
    for line in contents.lines() {
        out.push_str(line);
        out.push('\n');
        let trimmed = line.trim();
        if !inserted && trimmed.starts_with("http") && trimmed.ends_with('{') {
            out.push_str(&format!("    include {};\n", pattern));
            inserted = true;
        }
    }
    inserted.then_some(out)
}
