//! Containerized mode

use std::sync::Arc;

use appdeploy::deploy::compose::ContainerOrchestrator;
use appdeploy::deploy::orchestrator::DeploymentOrchestrator;
use appdeploy::errors::DeployError;
use appdeploy::models::run::{RequestedCommand, RunOutcome, Step};
use appdeploy::report::Reporter;

use crate::common::{fast_health, CountingProbe, FakeRunner, TestHost};

async fn compose_host() -> TestHost {
    let host = TestHost::debian().await;
    std::fs::write(
        host.app_root.join("docker-compose.yml"),
        "services:\n  web:\n    build: .\n",
    )
    .unwrap();
    host
}

#[tokio::test]
async fn test_deploy_passes_ports_and_domain() {
    let host = compose_host().await;
    let runner = Arc::new(FakeRunner::new());
    let compose = ContainerOrchestrator::new(runner.clone(), &host.container_config());

    compose.deploy().await.unwrap();

    let up = runner
        .invocations()
        .into_iter()
        .find(|inv| inv.command_line() == "docker compose up -d --build")
        .unwrap();
    assert_eq!(up.current_dir.as_deref(), Some(host.app_root.as_path()));
    for (key, value) in [
        ("APP_PORT", "5000"),
        ("HTTP_PORT", "80"),
        ("HTTPS_PORT", "443"),
        ("DOMAIN", "localhost"),
    ] {
        assert!(up.envs.contains(&(key.to_string(), value.to_string())), "{:?}", up.envs);
    }
}

#[tokio::test]
async fn test_falls_back_to_legacy_compose() {
    let host = compose_host().await;
    let runner = Arc::new(FakeRunner::new());
    runner.on("docker compose version", 1, "");
    let compose = ContainerOrchestrator::new(runner.clone(), &host.container_config());

    compose.deploy().await.unwrap();
    compose.down().await.unwrap();

    let calls = runner.calls();
    assert!(calls.contains(&"docker-compose up -d --build".to_string()));
    assert!(calls.contains(&"docker-compose down".to_string()));
    // Detection happens once
    assert_eq!(calls.iter().filter(|c| c.contains("version")).count(), 1);
}

#[tokio::test]
async fn test_update_recreates_in_order() {
    let host = compose_host().await;
    let runner = Arc::new(FakeRunner::new());
    let compose = ContainerOrchestrator::new(runner.clone(), &host.container_config());

    compose.update().await.unwrap();

    let down = runner.position("compose down").unwrap();
    let build = runner.position("compose build --pull").unwrap();
    let up = runner.position("compose up -d").unwrap();
    assert!(down < build && build < up);
}

#[tokio::test]
async fn test_missing_compose_file_is_an_error() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    let compose = ContainerOrchestrator::new(runner.clone(), &host.container_config());

    assert!(matches!(compose.deploy().await, Err(DeployError::ComposeError(_))));
    assert!(!runner.called("up -d"));
}

#[tokio::test]
async fn test_containerized_deploy_run() {
    let host = compose_host().await;
    let runner = Arc::new(FakeRunner::new());
    let probe = Arc::new(CountingProbe::healthy_from(2));

    let run = DeploymentOrchestrator::new(
        host.container_config(),
        host.layout.clone(),
        runner.clone(),
        probe.clone(),
    )
    .with_health(fast_health(5))
    .with_reporter(Reporter::new(true))
    .execute(RequestedCommand::Deploy)
    .await;

    assert!(run.succeeded(), "{:?}", run.error);
    assert!(run.has_completed(Step::StartedContainers));
    assert!(run.has_completed(Step::VerifiedHealth));
    assert_eq!(probe.attempts(), 2);
    // No host-level provisioning in this mode
    assert!(!runner.called("apt-get"));
    assert!(!runner.called("systemctl"));
}

#[tokio::test]
async fn test_fix_repos_rejected_in_container_mode() {
    let host = compose_host().await;
    let runner = Arc::new(FakeRunner::new());

    let run = DeploymentOrchestrator::new(
        host.container_config(),
        host.layout.clone(),
        runner.clone(),
        Arc::new(CountingProbe::healthy_from(1)),
    )
    .with_reporter(Reporter::new(true))
    .execute(RequestedCommand::FixRepos)
    .await;

    assert_eq!(run.outcome, RunOutcome::Failure);
    assert!(runner.calls().is_empty());
}
