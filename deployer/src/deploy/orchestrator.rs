//! Top-level sequencing of a deployment run

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::deployment::{DeployMode, DeploymentConfig};
use crate::config::env_file::{ensure_env_file, EnvFileOutcome};
use crate::deploy::compose::ContainerOrchestrator;
use crate::deploy::fsm::{OrchestratorEvent, OrchestratorFsm};
use crate::deploy::health::{wait_healthy, HealthOptions, HealthProbe};
use crate::deploy::snapshot::SnapshotStore;
use crate::deploy::source::SourceRefresher;
use crate::errors::DeployError;
use crate::host::probe::EnvironmentProbe;
use crate::models::host::HostProfile;
use crate::models::route::ProxyRoute;
use crate::models::run::{DeploymentRun, RequestedCommand, Step};
use crate::models::unit::{ServiceUnitSpec, ServiceUnitState};
use crate::provision::firewall;
use crate::provision::packages::{default_packages, PackageProvisioner};
use crate::proxy::configurer::ReverseProxyConfigurer;
use crate::proxy::tls;
use crate::report::Reporter;
use crate::storage::layout::HostLayout;
use crate::storage::lock::RunLock;
use crate::supervise::unit::ServiceUnitManager;
use crate::system::runner::{CommandRunner, Invocation};

/// How much of the journal `logs` shows
#[derive(Debug, Clone, Copy)]
pub struct LogTail {
    pub lines: u32,
    pub follow: bool,
}

impl Default for LogTail {
    fn default() -> Self {
        Self {
            lines: 100,
            follow: false,
        }
    }
}

/// Whether `command` exists in `mode`
pub fn supports(mode: DeployMode, command: RequestedCommand) -> bool {
    match command {
        RequestedCommand::FixRepos => mode == DeployMode::BareHost,
        RequestedCommand::Down | RequestedCommand::Build => mode == DeployMode::Containerized,
        _ => true,
    }
}

/// Host resources touched by a bare-host run, kept for compensation
struct BareHostResources {
    unit: ServiceUnitManager,
    proxy: ReverseProxyConfigurer,
}

/// Sequences the components for one requested command
pub struct DeploymentOrchestrator {
    config: DeploymentConfig,
    layout: HostLayout,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn HealthProbe>,
    health: HealthOptions,
    log_tail: LogTail,
    reporter: Reporter,
}

impl DeploymentOrchestrator {
    pub fn new(
        config: DeploymentConfig,
        layout: HostLayout,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        Self {
            config,
            layout,
            runner,
            probe,
            health: HealthOptions::default(),
            log_tail: LogTail::default(),
            reporter: Reporter::default(),
        }
    }

    pub fn with_health(mut self, health: HealthOptions) -> Self {
        self.health = health;
        self
    }

    pub fn with_log_tail(mut self, log_tail: LogTail) -> Self {
        self.log_tail = log_tail;
        self
    }

    pub fn with_reporter(mut self, reporter: Reporter) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Run `command` to completion and return its record.
    ///
    /// Mutating commands hold the run lock and persist the record as the
    /// last run, whatever the outcome.
    pub async fn execute(&self, command: RequestedCommand) -> DeploymentRun {
        let mut run = DeploymentRun::new(command);
        info!("Run {} started: {} ({} mode)", run.id, command, self.config.mode);

        if !supports(self.config.mode, command) {
            let e = DeployError::UnsupportedCommand {
                command: command.to_string(),
                mode: self.config.mode.to_string(),
            };
            self.reporter.error(&e.to_string());
            run.fail(e.to_string());
            return run;
        }

        let _lock = if command.is_mutating() {
            match RunLock::acquire(&self.layout.lock_file()).await {
                Ok(lock) => Some(lock),
                Err(e) => {
                    self.reporter.error(&e.to_string());
                    run.fail(e.to_string());
                    return run;
                }
            }
        } else {
            None
        };

        let result = match self.config.mode {
            DeployMode::BareHost => self.execute_bare(command, &mut run).await,
            DeployMode::Containerized => self.execute_containerized(command, &mut run).await,
        };

        let running = match result {
            Ok(running) => {
                run.succeed();
                running
            }
            Err(e) => {
                run.fail(e.to_string());
                Vec::new()
            }
        };

        if matches!(
            command,
            RequestedCommand::Deploy | RequestedCommand::Start | RequestedCommand::Update
        ) || !run.succeeded()
        {
            let access_url = self.config.access_url().ok().map(|url| url.to_string());
            self.reporter.summary(&run, &running, access_url.as_deref());
        }

        if command.is_mutating() {
            if let Err(e) = self.layout.last_run_file().write_json(&run).await {
                warn!("Failed to persist run record: {}", e);
            }
        }
        run
    }

    async fn execute_bare(
        &self,
        command: RequestedCommand,
        run: &mut DeploymentRun,
    ) -> Result<Vec<String>, DeployError> {
        match command {
            RequestedCommand::Deploy => self.deploy_bare(run).await,
            RequestedCommand::Update => self.update_bare(run).await,
            RequestedCommand::FixRepos => self.fix_repos(run).await,
            RequestedCommand::Start => {
                let mut unit = self.open_unit().await;
                unit.start().await?;
                run.complete(Step::StartedUnit);
                self.reporter.success(&format!("Started {}", self.config.service_name));
                self.verify_health(run).await?;
                Ok(vec![self.unit_label()])
            }
            RequestedCommand::Stop => {
                let mut unit = self.open_unit().await;
                unit.stop().await?;
                run.complete(Step::StoppedUnit);
                self.reporter.success(&format!("Stopped {}", self.config.service_name));
                Ok(Vec::new())
            }
            RequestedCommand::Restart => {
                let mut unit = self.open_unit().await;
                unit.restart().await?;
                run.complete(Step::StartedUnit);
                self.reporter.success(&format!("Restarted {}", self.config.service_name));
                self.verify_health(run).await?;
                Ok(vec![self.unit_label()])
            }
            RequestedCommand::Status => self.status_bare().await,
            RequestedCommand::Logs => {
                let unit = self.open_unit().await;
                unit.logs(self.log_tail.lines, self.log_tail.follow).await?;
                Ok(Vec::new())
            }
            RequestedCommand::Down | RequestedCommand::Build => Err(DeployError::UnsupportedCommand {
                command: command.to_string(),
                mode: self.config.mode.to_string(),
            }),
        }
    }

    async fn execute_containerized(
        &self,
        command: RequestedCommand,
        run: &mut DeploymentRun,
    ) -> Result<Vec<String>, DeployError> {
        let compose = ContainerOrchestrator::new(self.runner.clone(), &self.config);
        match command {
            RequestedCommand::Deploy => self.deploy_containerized(&compose, run).await,
            RequestedCommand::Update => {
                self.reporter
                    .warning("Containers are recreated; expect downtime until they are back up");
                compose.update().await?;
                run.complete(Step::StoppedContainers);
                run.complete(Step::BuiltContainers);
                run.complete(Step::StartedContainers);
                self.reporter.success("Containers rebuilt and started");
                self.verify_health(run).await?;
                Ok(vec!["containers".to_string()])
            }
            RequestedCommand::Start => {
                compose.start().await?;
                run.complete(Step::StartedContainers);
                self.reporter.success("Containers started");
                Ok(vec!["containers".to_string()])
            }
            RequestedCommand::Stop => {
                compose.stop().await?;
                run.complete(Step::StoppedContainers);
                self.reporter.success("Containers stopped");
                Ok(Vec::new())
            }
            RequestedCommand::Restart => {
                compose.restart().await?;
                run.complete(Step::StartedContainers);
                self.reporter.success("Containers restarted");
                Ok(vec!["containers".to_string()])
            }
            RequestedCommand::Down => {
                compose.down().await?;
                run.complete(Step::StoppedContainers);
                self.reporter.success("Containers removed");
                Ok(Vec::new())
            }
            RequestedCommand::Build => {
                compose.build().await?;
                run.complete(Step::BuiltContainers);
                self.reporter.success("Images built");
                Ok(Vec::new())
            }
            RequestedCommand::Status => {
                let listing = compose.status().await?;
                println!("{}", listing.trim_end());
                let healthy = self.check_once().await;
                self.report_health(healthy);
                Ok(Vec::new())
            }
            RequestedCommand::Logs => {
                compose
                    .logs(self.log_tail.lines, self.log_tail.follow)
                    .await?;
                Ok(Vec::new())
            }
            RequestedCommand::FixRepos => Err(DeployError::UnsupportedCommand {
                command: command.to_string(),
                mode: self.config.mode.to_string(),
            }),
        }
    }

    /// Full bare-host deploy through the state machine
    async fn deploy_bare(&self, run: &mut DeploymentRun) -> Result<Vec<String>, DeployError> {
        let mut fsm = OrchestratorFsm::new();
        advance(&mut fsm, OrchestratorEvent::Begin)?;

        let profile = match self.probe_host().await {
            Ok(profile) => profile,
            Err(e) => {
                let _ = fsm.process(OrchestratorEvent::Fail(e.to_string()));
                return Err(e);
            }
        };
        run.complete(Step::ProbedEnvironment);
        advance(&mut fsm, OrchestratorEvent::HostProbed { containerized: false })?;

        let mut resources = BareHostResources {
            unit: self.open_unit().await,
            proxy: ReverseProxyConfigurer::new(self.runner.clone(), self.layout.clone()),
        };

        match self
            .bare_steps(run, &mut fsm, &profile, &mut resources)
            .await
        {
            Ok(running) => Ok(running),
            Err(e) => {
                let _ = fsm.process(OrchestratorEvent::Fail(e.to_string()));
                if let Some(state) = fsm.failed_in() {
                    self.reporter
                        .error(&format!("Deploy failed while {:?}: {}", state, e));
                }
                self.compensate(run, &mut resources).await;
                Err(e)
            }
        }
    }

    async fn bare_steps(
        &self,
        run: &mut DeploymentRun,
        fsm: &mut OrchestratorFsm,
        profile: &HostProfile,
        resources: &mut BareHostResources,
    ) -> Result<Vec<String>, DeployError> {
        // Provisioning
        self.reporter
            .info(&format!("Installing system packages with {}", profile.package_manager));
        let provisioner = PackageProvisioner::new(self.runner.clone(), self.layout.clone());
        let report = provisioner
            .ensure(&default_packages(profile.package_manager), profile)
            .await?;
        if !report.repaired.is_empty() {
            run.complete(Step::RepairedRepositories);
        }
        for warning in report.warnings {
            self.reporter.warning(&warning);
            run.warn(warning);
        }
        run.complete(Step::InstalledPackages);
        if report.installed.is_empty() {
            self.reporter.success("System packages already present");
        } else {
            self.reporter
                .success(&format!("Installed {}", report.installed.join(" ")));
        }

        self.reporter.info("Preparing Python environment");
        SourceRefresher::new(self.runner.clone(), &self.config.app_root_path)
            .prepare_dependencies()
            .await?;
        run.complete(Step::PreparedDependencies);

        if self.config.open_firewall {
            let ports = [self.config.http_port, self.config.https_port];
            match firewall::open_ports(self.runner.as_ref(), profile, &ports).await {
                Ok(true) => {
                    run.complete(Step::OpenedFirewall);
                    self.reporter.success("Firewall ports opened");
                }
                Ok(false) => {
                    let warning = "No supported firewall frontend found".to_string();
                    self.reporter.warning(&warning);
                    run.warn(warning);
                }
                Err(e) => {
                    self.reporter.warning(&e.to_string());
                    run.warn(e.to_string());
                }
            }
        }
        advance(fsm, OrchestratorEvent::Provisioned)?;

        // Supervision
        let user = self.config.service_user_for(profile).to_string();
        if ensure_env_file(&self.config).await? == EnvFileOutcome::Created {
            run.complete(Step::WroteEnvironmentFile);
            self.reporter.success("Generated environment file");
            self.chown_env_file(&user, run).await;
        } else {
            self.reporter.info("Keeping existing environment file");
        }

        let spec = ServiceUnitSpec::derive(&self.config, profile);
        resources.unit.record_prior().await?;
        let changed = resources.unit.install(&spec).await?;
        run.complete(Step::InstalledUnit);
        resources.unit.set_enabled(true).await?;
        run.complete(Step::EnabledUnit);
        if changed {
            resources.unit.restart().await?;
        } else {
            resources.unit.start().await?;
        }
        run.complete(Step::StartedUnit);

        // Route only goes live in front of a running backend
        let state = resources.unit.status().await?;
        if state != ServiceUnitState::Running {
            return Err(DeployError::UnitControl {
                action: "start".to_string(),
                detail: format!("{} is {} after start", self.config.service_name, state),
            });
        }
        self.reporter
            .success(&format!("{} running as {}", self.config.service_name, user));
        advance(fsm, OrchestratorEvent::SupervisionConfigured)?;

        // Proxy
        let mut route = ProxyRoute::derive(&self.config);
        resources.proxy.apply(&mut route, profile).await?;
        run.complete(Step::AppliedProxyRoute);
        self.reporter
            .success(&format!("nginx routing {} to {}", route.domain, route.upstream));

        if self.config.wants_tls() {
            match tls::request_certificate(self.runner.as_ref(), &self.config).await {
                Ok(()) => {
                    run.complete(Step::RequestedCertificate);
                    self.reporter.success("TLS certificate installed");
                }
                Err(e) => {
                    self.reporter.warning(&e.to_string());
                    run.warn(e.to_string());
                }
            }
        }
        advance(fsm, OrchestratorEvent::ProxyConfigured)?;

        // Health
        let healthy = self.verify_health(run).await?;
        advance(fsm, OrchestratorEvent::HealthChecked)?;

        let mut running = vec![self.unit_label(), "nginx".to_string()];
        if healthy {
            running.push("health endpoint".to_string());
        }
        Ok(running)
    }

    async fn deploy_containerized(
        &self,
        compose: &ContainerOrchestrator,
        run: &mut DeploymentRun,
    ) -> Result<Vec<String>, DeployError> {
        let mut fsm = OrchestratorFsm::new();
        advance(&mut fsm, OrchestratorEvent::Begin)?;

        // Compose does not care about the package manager
        match self.probe_host().await {
            Ok(_) => run.complete(Step::ProbedEnvironment),
            Err(e) => debug!("Continuing without host profile: {}", e),
        }
        advance(&mut fsm, OrchestratorEvent::HostProbed { containerized: true })?;

        self.reporter.info("Building and starting containers");
        if let Err(e) = compose.deploy().await {
            let _ = fsm.process(OrchestratorEvent::Fail(e.to_string()));
            return Err(e);
        }
        run.complete(Step::BuiltContainers);
        run.complete(Step::StartedContainers);
        self.reporter.success("Containers started");
        advance(&mut fsm, OrchestratorEvent::ContainersUp)?;

        let healthy = self.verify_health(run).await?;
        advance(&mut fsm, OrchestratorEvent::HealthChecked)?;

        let mut running = vec!["containers".to_string()];
        if healthy {
            running.push("health endpoint".to_string());
        }
        Ok(running)
    }

    /// Snapshot, stop, refresh, restart. A failure leaves the service stopped
    /// and the snapshot in place for a manual restore.
    async fn update_bare(&self, run: &mut DeploymentRun) -> Result<Vec<String>, DeployError> {
        let store = SnapshotStore::new(self.layout.backups_dir());
        let snapshot = store
            .take(&self.config.app_root_path, &self.config.service_name)
            .await?;
        run.complete(Step::SnapshotTaken);
        self.reporter
            .success(&format!("Snapshot saved to {}", snapshot.display()));

        let mut unit = self.open_unit().await;
        let result = self.refresh_and_restart(run, &mut unit).await;
        if let Err(e) = result {
            if run.has_completed(Step::StoppedUnit) {
                self.settle_stopped(run, &mut unit).await;
            }
            self.report_kept_snapshot(run, &snapshot);
            return Err(e);
        }

        self.verify_health(run).await?;
        Ok(vec![self.unit_label()])
    }

    async fn refresh_and_restart(
        &self,
        run: &mut DeploymentRun,
        unit: &mut ServiceUnitManager,
    ) -> Result<(), DeployError> {
        unit.stop().await?;
        run.complete(Step::StoppedUnit);
        self.reporter
            .info(&format!("Stopped {}", self.config.service_name));

        SourceRefresher::new(self.runner.clone(), &self.config.app_root_path)
            .refresh()
            .await?;
        run.complete(Step::RefreshedSources);
        self.reporter.success("Sources and dependencies refreshed");

        unit.restart().await?;
        run.complete(Step::StartedUnit);
        self.reporter
            .success(&format!("Restarted {}", self.config.service_name));
        Ok(())
    }

    /// Stop a unit a failed restart may have left crash-looping under
    /// `Restart=always`, and record where it ended up
    async fn settle_stopped(&self, run: &mut DeploymentRun, unit: &mut ServiceUnitManager) {
        if let Err(e) = unit.stop().await {
            warn!("Could not stop {} after failed update: {}", self.config.service_name, e);
        }
        match unit.status().await {
            Ok(state) => {
                if state != ServiceUnitState::Stopped {
                    let warning = format!("{} is {} after failed update", self.config.service_name, state);
                    self.reporter.warning(&warning);
                    run.warn(warning);
                }
                run.service_state = Some(state);
            }
            Err(e) => warn!("Could not query {}: {}", self.config.service_name, e),
        }
    }

    fn report_kept_snapshot(&self, run: &mut DeploymentRun, snapshot: &Path) {
        let note = format!(
            "{} left stopped; restore from snapshot {} if needed",
            self.config.service_name,
            snapshot.display()
        );
        self.reporter.warning(&note);
        run.warn(note);
    }

    async fn fix_repos(&self, run: &mut DeploymentRun) -> Result<Vec<String>, DeployError> {
        let profile = self.probe_host().await?;
        run.complete(Step::ProbedEnvironment);

        let provisioner = PackageProvisioner::new(self.runner.clone(), self.layout.clone());
        let report = provisioner.repair_known_bad_repositories(&profile).await;
        for warning in report.warnings {
            self.reporter.warning(&warning);
            run.warn(warning);
        }
        if report.repaired.is_empty() {
            self.reporter.success("No problematic repositories found");
        } else {
            run.complete(Step::RepairedRepositories);
            for path in &report.repaired {
                self.reporter
                    .success(&format!("Removed {}", path.display()));
            }
        }
        Ok(Vec::new())
    }

    async fn status_bare(&self) -> Result<Vec<String>, DeployError> {
        let mut unit = self.open_unit().await;
        let state = unit.status().await?;
        self.reporter
            .info(&format!("{}: {}", self.config.service_name, state));

        let proxy = ReverseProxyConfigurer::new(self.runner.clone(), self.layout.clone());
        if proxy.is_running().await {
            self.reporter.info("nginx: running");
        } else {
            self.reporter.warning("nginx: not running");
        }

        let healthy = self.check_once().await;
        self.report_health(healthy);
        Ok(Vec::new())
    }

    /// Undo completed steps, newest first, back to the unit's state before
    /// the run. Failures are logged and skipped.
    async fn compensate(&self, run: &DeploymentRun, resources: &mut BareHostResources) {
        for step in run.steps_completed.iter().rev() {
            let result = match step {
                Step::AppliedProxyRoute => resources.proxy.revert().await,
                Step::StartedUnit => resources.unit.undo_start().await,
                Step::EnabledUnit => resources.unit.undo_enable().await,
                Step::InstalledUnit => resources.unit.uninstall().await,
                other => {
                    debug!("Nothing to compensate for {:?}", other);
                    continue;
                }
            };
            match result {
                Ok(()) => info!("Compensated {:?}", step),
                Err(e) => error!("Compensation of {:?} failed: {}", step, e),
            }
        }
    }

    async fn verify_health(&self, run: &mut DeploymentRun) -> Result<bool, DeployError> {
        let url = self.config.health_url()?;
        self.reporter.info(&format!("Waiting for {}", url));
        let healthy = wait_healthy(self.probe.as_ref(), &url, &self.health, tokio::time::sleep).await;
        if healthy {
            run.complete(Step::VerifiedHealth);
            self.reporter.success("Health check passed");
        } else {
            self.tolerate(
                run,
                DeployError::HealthCheckTimeout {
                    url: url.to_string(),
                    attempts: self.health.max_attempts,
                },
            )?;
        }
        Ok(healthy)
    }

    /// Record `e` on the run if it is only a warning, otherwise return it
    fn tolerate(&self, run: &mut DeploymentRun, e: DeployError) -> Result<(), DeployError> {
        if !e.is_warning() {
            return Err(e);
        }
        self.reporter.warning(&e.to_string());
        run.warn(e.to_string());
        Ok(())
    }

    async fn check_once(&self) -> bool {
        match self.config.health_url() {
            Ok(url) => self.probe.check(&url).await,
            Err(_) => false,
        }
    }

    fn report_health(&self, healthy: bool) {
        if healthy {
            self.reporter.info("health: ok");
        } else {
            self.reporter.warning("health: not responding");
        }
    }

    async fn probe_host(&self) -> Result<HostProfile, DeployError> {
        self.reporter.info("Detecting host environment");
        let profile = EnvironmentProbe::new(self.layout.clone()).probe().await?;
        self.reporter.success(&format!(
            "{} host ({:?}, {:?})",
            profile.distribution, profile.os_family, profile.proxy_layout
        ));
        Ok(profile)
    }

    async fn open_unit(&self) -> ServiceUnitManager {
        ServiceUnitManager::open(self.runner.clone(), &self.layout, &self.config.service_name).await
    }

    fn unit_label(&self) -> String {
        format!("{} (systemd)", self.config.service_name)
    }

    async fn chown_env_file(&self, user: &str, run: &mut DeploymentRun) {
        let env_file = self.config.app_root_path.join(".env");
        let chown = Invocation::new("chown")
            .arg(format!("{}:{}", user, user))
            .arg(env_file.to_string_lossy());
        match self.runner.run(&chown).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                let warning = format!("Could not hand .env to {}: {}", user, output.combined());
                self.reporter.warning(&warning);
                run.warn(warning);
            }
            Err(e) => {
                self.reporter.warning(&e.to_string());
                run.warn(e.to_string());
            }
        }
    }
}

fn advance(fsm: &mut OrchestratorFsm, event: OrchestratorEvent) -> Result<(), DeployError> {
    fsm.process(event)
        .map(|state| debug!("Orchestrator state: {:?}", state))
        .map_err(DeployError::TransitionError)
}
