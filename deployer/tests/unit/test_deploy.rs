//! End-to-end runs of the orchestrator against a scripted host

use std::sync::Arc;

use appdeploy::config::deployment::{DeploymentConfig, DeploymentOptions};
use appdeploy::deploy::orchestrator::DeploymentOrchestrator;
use appdeploy::errors::DeployError;
use appdeploy::models::run::{DeploymentRun, RequestedCommand, RunOutcome, Step};
use appdeploy::report::Reporter;

use crate::common::{fast_health, healthy_host_runner, CountingProbe, FakeRunner, TestHost};

fn orchestrator(
    host: &TestHost,
    config: DeploymentConfig,
    runner: &Arc<FakeRunner>,
    probe: &Arc<CountingProbe>,
) -> DeploymentOrchestrator {
    DeploymentOrchestrator::new(config, host.layout.clone(), runner.clone(), probe.clone())
        .with_health(fast_health(3))
        .with_reporter(Reporter::new(true))
}

#[tokio::test]
async fn test_default_deploy_on_fresh_debian_host() {
    let host = TestHost::debian().await;
    let runner = Arc::new(healthy_host_runner());
    let probe = Arc::new(CountingProbe::healthy_from(1));

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;

    assert!(run.succeeded(), "{:?}", run.error);
    assert!(run.warnings.is_empty(), "{:?}", run.warnings);
    for step in [
        Step::ProbedEnvironment,
        Step::InstalledPackages,
        Step::PreparedDependencies,
        Step::WroteEnvironmentFile,
        Step::InstalledUnit,
        Step::EnabledUnit,
        Step::StartedUnit,
        Step::AppliedProxyRoute,
        Step::VerifiedHealth,
    ] {
        assert!(run.has_completed(step), "missing {:?} in {:?}", step, run.steps_completed);
    }

    // Unit running before the route went live
    let unit = host.layout.unit_file("psyfind").read_string().await.unwrap();
    assert!(unit.contains("--bind 127.0.0.1:5000"));
    assert!(unit.contains("User=www-data"));
    let started = runner.position("systemctl restart psyfind").unwrap();
    let checked = runner.position("systemctl is-active psyfind").unwrap();
    let validated = runner.position("nginx -t").unwrap();
    assert!(started < checked && checked < validated);

    // Route active
    let enabled = host.layout.sites_enabled_dir().file("psyfind.conf");
    let target = enabled.link_target().await.unwrap();
    assert!(target.starts_with(host.layout.sites_available_dir().path()));
    assert!(enabled.read_string().await.unwrap().contains("proxy_pass http://127.0.0.1:5000"));
    assert!(runner.called("systemctl reload-or-restart nginx"));

    // Only missing packages, one transaction
    assert_eq!(runner.calls().iter().filter(|c| c.starts_with("apt-get install")).count(), 1);
    assert_eq!(probe.attempts(), 1);

    // Secret file private and recorded run persisted
    let env = std::fs::metadata(host.app_root.join(".env")).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        assert_eq!(env.permissions().mode() & 0o777, 0o600);
    }
    let recorded: DeploymentRun = host.layout.last_run_file().read_json().await.unwrap();
    assert_eq!(recorded.id, run.id);
    assert_eq!(recorded.outcome, RunOutcome::Success);
    assert!(!host.layout.lock_file().exists().await);
}

#[tokio::test]
async fn test_redeploy_keeps_environment_file() {
    let host = TestHost::debian().await;
    let runner = Arc::new(healthy_host_runner());
    runner.on("dpkg-query", 0, "install ok installed");
    let probe = Arc::new(CountingProbe::healthy_from(1));
    let deployer = orchestrator(&host, host.config(), &runner, &probe);

    assert!(deployer.execute(RequestedCommand::Deploy).await.succeeded());
    let env_before = std::fs::read_to_string(host.app_root.join(".env")).unwrap();

    let second = deployer.execute(RequestedCommand::Deploy).await;
    assert!(second.succeeded(), "{:?}", second.error);
    assert!(!second.has_completed(Step::WroteEnvironmentFile));
    assert_eq!(std::fs::read_to_string(host.app_root.join(".env")).unwrap(), env_before);
    // Installed packages are never reinstalled
    assert!(!runner.called("apt-get"));
}

#[tokio::test]
async fn test_unhealthy_service_is_a_warning() {
    let host = TestHost::debian().await;
    let runner = Arc::new(healthy_host_runner());
    let probe = Arc::new(CountingProbe::never_healthy());

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;

    assert!(run.succeeded());
    assert_eq!(probe.attempts(), 3);
    assert!(!run.has_completed(Step::VerifiedHealth));
    assert_eq!(run.warnings.len(), 1);
}

#[tokio::test]
async fn test_rejected_route_compensates_in_reverse() {
    let host = TestHost::debian().await;
    let runner = Arc::new(healthy_host_runner());
    runner.on("nginx -t", 1, "");
    let probe = Arc::new(CountingProbe::healthy_from(1));

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;

    assert_eq!(run.outcome, RunOutcome::Failure);
    assert!(!run.has_completed(Step::AppliedProxyRoute));
    assert_eq!(probe.attempts(), 0);

    let stop = runner.position("systemctl stop psyfind").unwrap();
    let disable = runner.position("systemctl disable psyfind").unwrap();
    assert!(stop < disable);
    assert!(!host.layout.unit_file("psyfind").exists().await);
    assert!(!host.layout.sites_enabled_dir().file("psyfind.conf").exists().await);
}

#[tokio::test]
async fn test_rejected_redeploy_leaves_running_service_up() {
    let host = TestHost::debian().await;
    let probe = Arc::new(CountingProbe::healthy_from(1));
    let first_runner = Arc::new(healthy_host_runner());
    let first = orchestrator(&host, host.config(), &first_runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;
    assert!(first.succeeded(), "{:?}", first.error);

    let enabled = host.layout.sites_enabled_dir().file("psyfind.conf");
    let live_route = enabled.link_target().await.unwrap();
    let live_unit = host.layout.unit_file("psyfind").read_string().await.unwrap();

    // New domain and worker count: both the unit and the route change
    let config = DeploymentConfig::validate(DeploymentOptions {
        domain: "example.org".to_string(),
        workers: 4,
        ..host.options()
    })
    .unwrap();
    let runner = Arc::new(healthy_host_runner());
    runner.on("dpkg-query", 0, "install ok installed");
    runner.on("systemctl is-enabled psyfind", 0, "enabled\n");
    runner.on("nginx -t", 1, "");

    let run = orchestrator(&host, config, &runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;

    assert_eq!(run.outcome, RunOutcome::Failure);
    assert_eq!(enabled.link_target().await.unwrap(), live_route);
    assert_eq!(host.layout.unit_file("psyfind").read_string().await.unwrap(), live_unit);

    let calls = runner.calls();
    assert!(!calls.iter().any(|c| c == "systemctl stop psyfind"), "{:?}", calls);
    assert!(!calls.iter().any(|c| c == "systemctl disable psyfind"), "{:?}", calls);
    // The restored definition is brought back up
    let rejected = runner.position("nginx -t").unwrap();
    assert!(calls[rejected..].iter().any(|c| c == "systemctl restart psyfind"), "{:?}", calls);
}

#[tokio::test]
async fn test_restart_verifies_health() {
    let host = TestHost::debian().await;
    let runner = Arc::new(healthy_host_runner());
    let probe = Arc::new(CountingProbe::healthy_from(2));

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Restart)
        .await;

    assert!(run.succeeded(), "{:?}", run.error);
    assert!(runner.called("systemctl restart psyfind"));
    assert!(run.has_completed(Step::VerifiedHealth));
    assert_eq!(probe.attempts(), 2);
}

#[tokio::test]
async fn test_unit_not_running_blocks_route() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    runner.on("systemctl is-active", 3, "failed\n");
    let probe = Arc::new(CountingProbe::healthy_from(1));

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;

    assert_eq!(run.outcome, RunOutcome::Failure);
    assert!(!runner.called("nginx -t"));
    assert!(!host.layout.sites_enabled_dir().file("psyfind.conf").exists().await);
}

#[tokio::test]
async fn test_unsupported_host_fails_before_mutation() {
    let host = TestHost::with_os_release("ID=arch\n").await;
    let runner = Arc::new(healthy_host_runner());
    let probe = Arc::new(CountingProbe::healthy_from(1));

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;

    assert_eq!(run.outcome, RunOutcome::Failure);
    assert!(run.error.as_deref().unwrap().contains("arch"));
    assert!(runner.calls().is_empty(), "{:?}", runner.calls());
    assert!(!host.layout.unit_file("psyfind").exists().await);
}

#[tokio::test]
async fn test_container_verbs_rejected_in_bare_mode() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    let probe = Arc::new(CountingProbe::healthy_from(1));
    let deployer = orchestrator(&host, host.config(), &runner, &probe);

    for command in [RequestedCommand::Down, RequestedCommand::Build] {
        let run = deployer.execute(command).await;
        assert_eq!(run.outcome, RunOutcome::Failure);
    }
    assert!(runner.calls().is_empty());
    assert!(!host.layout.last_run_file().exists().await);
}

#[tokio::test]
async fn test_concurrent_run_is_refused() {
    let host = TestHost::debian().await;
    host.layout.lock_file().write_string("pid=1").await.unwrap();
    let runner = Arc::new(healthy_host_runner());
    let probe = Arc::new(CountingProbe::healthy_from(1));

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Deploy)
        .await;

    assert_eq!(run.outcome, RunOutcome::Failure);
    assert!(runner.calls().is_empty());
    assert!(host.layout.lock_file().exists().await);
}

#[test]
fn test_out_of_range_ports_fail_validation() {
    for (app, http, https) in [(0, 80, 443), (5000, 65536, 443), (5000, 80, 70000)] {
        let result = DeploymentConfig::validate(DeploymentOptions {
            app_port: app,
            http_port: http,
            https_port: https,
            ..Default::default()
        });
        assert!(matches!(result, Err(DeployError::ValidationError(_))));
    }
}

#[tokio::test]
async fn test_stop_on_absent_unit_succeeds() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    let probe = Arc::new(CountingProbe::healthy_from(1));

    let run = orchestrator(&host, host.config(), &runner, &probe)
        .execute(RequestedCommand::Stop)
        .await;

    assert!(run.succeeded());
    assert!(!runner.called("systemctl stop"));
}
