//! Reverse proxy route activation

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use appdeploy::errors::DeployError;
use appdeploy::models::host::ProxyLayout;
use appdeploy::models::route::{ProxyRoute, ProxyRouteState};
use appdeploy::proxy::configurer::ReverseProxyConfigurer;

use crate::common::{debian_profile, FakeRunner, TestHost};

/// Every entry under `dir`: file contents or `-> target` for symlinks
fn tree(dir: &Path) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current).unwrap() {
            let entry = entry.unwrap();
            let path = entry.path();
            let key = path.strip_prefix(dir).unwrap().display().to_string();
            let file_type = entry.file_type().unwrap();
            if file_type.is_symlink() {
                let target = std::fs::read_link(&path).unwrap();
                entries.insert(key, format!("-> {}", target.display()));
            } else if file_type.is_dir() {
                pending.push(path);
            } else {
                entries.insert(key, std::fs::read_to_string(&path).unwrap());
            }
        }
    }
    entries
}

#[tokio::test]
async fn test_apply_twice_is_idempotent() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    let profile = debian_profile(ProxyLayout::NeedsCreation);
    let mut configurer = ReverseProxyConfigurer::new(runner.clone(), host.layout.clone());

    let mut route = ProxyRoute::derive(&host.config());
    configurer.apply(&mut route, &profile).await.unwrap();
    assert_eq!(route.state, ProxyRouteState::Active);
    let nginx_dir = host.layout.nginx_dir();
    let first = tree(nginx_dir.path());

    let mut again = ProxyRoute::derive(&host.config());
    configurer.apply(&mut again, &profile).await.unwrap();
    let second = tree(nginx_dir.path());

    assert_eq!(first, second);
    let conf = host.layout.nginx_conf().read_string().await.unwrap();
    let include = format!("include {}/*;", host.layout.sites_enabled_dir().path().display());
    assert_eq!(conf.matches(&include).count(), 1);
}

#[tokio::test]
async fn test_rejected_route_keeps_previous_reference() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    let profile = debian_profile(ProxyLayout::NeedsCreation);
    let mut configurer = ReverseProxyConfigurer::new(runner.clone(), host.layout.clone());

    let mut route = ProxyRoute::derive(&host.config());
    configurer.apply(&mut route, &profile).await.unwrap();

    let enabled = configurer.enabled_file(&route, &profile);
    let link_before = enabled.link_target().await.unwrap();
    let content_before = enabled.read_string().await.unwrap();
    let conf_before = host.layout.nginx_conf().read_string().await.unwrap();
    let calls_before = runner.calls().len();

    runner.on("nginx -t", 1, "");
    let mut broken = ProxyRoute::derive(&host.config());
    broken.domain = "other.example.org".to_string();
    let result = configurer.apply(&mut broken, &profile).await;

    assert!(matches!(result, Err(DeployError::ProxyValidation { .. })));
    assert_ne!(broken.state, ProxyRouteState::Active);
    assert_eq!(enabled.link_target().await.unwrap(), link_before);
    assert_eq!(enabled.read_string().await.unwrap(), content_before);
    assert_eq!(host.layout.nginx_conf().read_string().await.unwrap(), conf_before);
    let later = &runner.calls()[calls_before..];
    assert!(!later.iter().any(|c| c.contains("reload-or-restart")), "{:?}", later);
}

#[tokio::test]
async fn test_rejected_first_route_leaves_nothing_enabled() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    runner.on("nginx -t", 1, "");
    let profile = debian_profile(ProxyLayout::NeedsCreation);
    let mut configurer = ReverseProxyConfigurer::new(runner.clone(), host.layout.clone());

    let mut route = ProxyRoute::derive(&host.config());
    assert!(configurer.apply(&mut route, &profile).await.is_err());

    let enabled = configurer.enabled_file(&route, &profile);
    assert!(enabled.link_target().await.is_none());
    assert!(!enabled.exists().await);
    // Rejected generation stays available for inspection
    let available = host.layout.sites_available_dir().list_files().await.unwrap();
    assert_eq!(available.len(), 1);
}

#[tokio::test]
async fn test_conf_d_layout_links_into_conf_d() {
    let host = TestHost::debian().await;
    host.layout.conf_d_dir().create().await.unwrap();
    let runner = Arc::new(FakeRunner::new());
    let profile = debian_profile(ProxyLayout::ConfD);
    let mut configurer = ReverseProxyConfigurer::new(runner.clone(), host.layout.clone());

    let mut route = ProxyRoute::derive(&host.config());
    configurer.apply(&mut route, &profile).await.unwrap();

    let enabled = host.layout.conf_d_dir().file("psyfind.conf");
    assert!(enabled.link_target().await.is_some());
    assert!(enabled.read_string().await.unwrap().contains("location = /health"));
    // conf.d is already included by the distribution config
    assert_eq!(
        host.layout.nginx_conf().read_string().await.unwrap(),
        crate::common::NGINX_CONF
    );
}

#[tokio::test]
async fn test_revert_restores_previous_route() {
    let host = TestHost::debian().await;
    let runner = Arc::new(FakeRunner::new());
    let profile = debian_profile(ProxyLayout::NeedsCreation);
    let mut configurer = ReverseProxyConfigurer::new(runner.clone(), host.layout.clone());

    let mut route = ProxyRoute::derive(&host.config());
    configurer.apply(&mut route, &profile).await.unwrap();
    let enabled = configurer.enabled_file(&route, &profile);
    let original = enabled.link_target().await.unwrap();

    let mut changed = ProxyRoute::derive(&host.config());
    changed.domain = "psyfind.example.org".to_string();
    configurer.apply(&mut changed, &profile).await.unwrap();
    assert_ne!(enabled.link_target().await.unwrap(), original);

    configurer.revert().await.unwrap();
    assert_eq!(enabled.link_target().await.unwrap(), original);
}

async fn host_with_default_site() -> TestHost {
    let host = TestHost::debian().await;
    let default_target = host.layout.sites_available_dir().file("default");
    default_target.write_string("server { listen 80 default_server; }\n").await.unwrap();
    host.layout
        .sites_enabled_dir()
        .file("default")
        .symlink_to(default_target.path())
        .await
        .unwrap();
    host
}

#[tokio::test]
async fn test_default_site_removed_after_reload() {
    let host = host_with_default_site().await;
    let runner = Arc::new(FakeRunner::new());
    let profile = debian_profile(ProxyLayout::SitesAvailableEnabled);
    let mut configurer = ReverseProxyConfigurer::new(runner.clone(), host.layout.clone());

    let mut route = ProxyRoute::derive(&host.config());
    configurer.apply(&mut route, &profile).await.unwrap();

    let default_site = host.layout.sites_enabled_dir().file("default");
    assert!(default_site.link_target().await.is_none());
    let reloads = runner.calls().iter().filter(|c| c.contains("reload-or-restart")).count();
    assert_eq!(reloads, 2);
}

#[tokio::test]
async fn test_failed_reload_keeps_default_site() {
    let host = host_with_default_site().await;
    let runner = Arc::new(FakeRunner::new());
    runner.on("reload-or-restart nginx", 1, "");
    let profile = debian_profile(ProxyLayout::SitesAvailableEnabled);
    let mut configurer = ReverseProxyConfigurer::new(runner.clone(), host.layout.clone());

    let mut route = ProxyRoute::derive(&host.config());
    assert!(matches!(
        configurer.apply(&mut route, &profile).await,
        Err(DeployError::ProxyError(_))
    ));

    let default_site = host.layout.sites_enabled_dir().file("default");
    assert!(default_site.link_target().await.is_some());
    assert!(!configurer.enabled_file(&route, &profile).exists().await);
}
