//! Bounded health verification

use std::cell::Cell;
use std::time::Duration;

use appdeploy::deploy::health::{wait_healthy, HealthOptions, HealthProbe, HttpProbe};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use url::Url;

use crate::common::{fast_health, CountingProbe};

fn health_url() -> Url {
    Url::parse("http://localhost/health").unwrap()
}

#[tokio::test]
async fn test_never_healthy_uses_exactly_max_attempts() {
    let probe = CountingProbe::never_healthy();
    let sleeps = Cell::new(0u32);
    let healthy = wait_healthy(&probe, &health_url(), &fast_health(5), |_| {
        sleeps.set(sleeps.get() + 1);
        async {}
    })
    .await;

    assert!(!healthy);
    assert_eq!(probe.attempts(), 5);
    assert_eq!(sleeps.get(), 4);
}

#[tokio::test]
async fn test_healthy_on_kth_attempt_stops_polling() {
    let probe = CountingProbe::healthy_from(3);
    let healthy = wait_healthy(&probe, &health_url(), &fast_health(30), |_| async {}).await;

    assert!(healthy);
    assert_eq!(probe.attempts(), 3);
}

#[tokio::test]
async fn test_sleeps_for_configured_interval() {
    let probe = CountingProbe::healthy_from(2);
    let options = HealthOptions {
        max_attempts: 4,
        interval: Duration::from_millis(1500),
    };
    let seen = Cell::new(Duration::ZERO);
    wait_healthy(&probe, &health_url(), &options, |interval| {
        seen.set(interval);
        async {}
    })
    .await;

    assert_eq!(seen.get(), Duration::from_millis(1500));
}

async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Url::parse(&format!("http://{}/health", addr)).unwrap()
}

#[tokio::test]
async fn test_http_probe_against_live_server() {
    let ok = serve(Router::new().route("/health", get(|| async { "ok" }))).await;
    let failing = serve(Router::new().route(
        "/health",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "starting") }),
    ))
    .await;

    let probe = HttpProbe::new(Duration::from_secs(2)).unwrap();
    assert!(probe.check(&ok).await);
    assert!(!probe.check(&failing).await);
}

#[tokio::test]
async fn test_http_probe_unreachable_is_unhealthy() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let probe = HttpProbe::new(Duration::from_millis(500)).unwrap();
    let url = Url::parse(&format!("http://{}/health", addr)).unwrap();
    assert!(!probe.check(&url).await);
}
