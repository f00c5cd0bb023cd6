//! Package provisioning and repository repair

use std::sync::Arc;

use appdeploy::deploy::orchestrator::DeploymentOrchestrator;
use appdeploy::errors::DeployError;
use appdeploy::models::host::{HostProfile, OsFamily, PackageManagerKind, ProxyLayout};
use appdeploy::models::run::{RequestedCommand, Step};
use appdeploy::provision::packages::PackageProvisioner;
use appdeploy::report::Reporter;

use crate::common::{debian_profile, CountingProbe, FakeRunner, TestHost};

fn rhel_profile() -> HostProfile {
    HostProfile {
        os_family: OsFamily::RhelLike,
        package_manager: PackageManagerKind::Yum,
        proxy_layout: ProxyLayout::ConfD,
        distribution: "rocky".to_string(),
        hostname: "test-host".to_string(),
    }
}

#[tokio::test]
async fn test_yum_installs_only_missing_packages() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    runner.on("rpm -q nginx", 1, "package nginx is not installed");
    let provisioner = PackageProvisioner::new(runner.clone(), host.layout.clone());

    let packages = vec!["python3".to_string(), "nginx".to_string()];
    let report = provisioner.ensure(&packages, &rhel_profile()).await.unwrap();

    assert_eq!(report.installed, vec!["nginx".to_string()]);
    assert!(runner.calls().contains(&"yum install -y -q nginx".to_string()));
}

#[tokio::test]
async fn test_nothing_missing_means_no_package_manager_run() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    runner.on("dpkg-query", 0, "install ok installed");
    let provisioner = PackageProvisioner::new(runner.clone(), host.layout.clone());

    let packages = vec!["nginx".to_string(), "git".to_string()];
    let report = provisioner
        .ensure(&packages, &debian_profile(ProxyLayout::SitesAvailableEnabled))
        .await
        .unwrap();

    assert!(report.installed.is_empty());
    assert!(!runner.called("apt-get"));
}

#[tokio::test]
async fn test_apt_failure_reports_exit_code() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    runner.on("apt-get install", 100, "");
    let provisioner = PackageProvisioner::new(runner.clone(), host.layout.clone());

    let result = provisioner
        .ensure(&["nginx".to_string()], &debian_profile(ProxyLayout::NeedsCreation))
        .await;

    match result {
        Err(DeployError::PackageInstall { manager, exit_code }) => {
            assert_eq!(manager, "apt");
            assert_eq!(exit_code, Some(100));
        }
        other => panic!("unexpected result: {:?}", other.map(|r| r.installed)),
    }
    let update = runner.position("apt-get update").unwrap();
    let install = runner.position("apt-get install").unwrap();
    assert!(update < install);
}

#[tokio::test]
async fn test_fix_repos_removes_nginx_org_sources() {
    let host = TestHost::debian().await;
    let sources = host.layout.apt_sources_dir();
    sources
        .file("nginx.list")
        .write_string("deb http://nginx.org/packages/ubuntu jammy nginx\n")
        .await
        .unwrap();
    sources
        .file("nginx-ppa.list")
        .write_string("# deb http://nginx.org/packages/ubuntu jammy nginx\ndeb http://ppa.launchpad.net/ondrej/nginx/ubuntu jammy main\n")
        .await
        .unwrap();
    sources
        .file("docker.list")
        .write_string("deb https://download.docker.com/linux/ubuntu jammy stable\n")
        .await
        .unwrap();
    let runner = Arc::new(FakeRunner::new());

    let run = DeploymentOrchestrator::new(
        host.config(),
        host.layout.clone(),
        runner.clone(),
        Arc::new(CountingProbe::healthy_from(1)),
    )
    .with_reporter(Reporter::new(true))
    .execute(RequestedCommand::FixRepos)
    .await;

    assert!(run.succeeded(), "{:?}", run.error);
    assert!(run.has_completed(Step::RepairedRepositories));
    assert!(!sources.file("nginx.list").exists().await);
    assert!(sources.file("nginx-ppa.list").exists().await);
    assert!(sources.file("docker.list").exists().await);
    assert!(runner.calls().is_empty());
}
