//! Bounded health verification

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::DeployError;

/// Health polling options
#[derive(Debug, Clone)]
pub struct HealthOptions {
    /// Attempts before giving up
    pub max_attempts: u32,

    /// Delay between attempts
    pub interval: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval: Duration::from_secs(2),
        }
    }
}

/// One health request
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether `url` answered with a success status
    async fn check(&self, url: &Url) -> bool;
}

/// Probes over HTTP
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(request_timeout: Duration) -> Result<Self, DeployError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn check(&self, url: &Url) -> bool {
        match self.client.get(url.clone()).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!("{} returned {}", url, response.status());
                false
            }
            Err(e) => {
                debug!("{} unreachable: {}", url, e);
                false
            }
        }
    }
}

/// Poll `url` until it is healthy or `max_attempts` probes have failed.
///
/// Sleeps only between attempts, never after the last one. There is no
/// cancellation besides dropping the future.
pub async fn wait_healthy<P, S, F>(
    probe: &P,
    url: &Url,
    options: &HealthOptions,
    sleep_fn: S,
) -> bool
where
    P: HealthProbe + ?Sized,
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    for attempt in 1..=options.max_attempts {
        if probe.check(url).await {
            info!("{} healthy after {} attempt(s)", url, attempt);
            return true;
        }
        if attempt < options.max_attempts {
            debug!("Health attempt {}/{} failed", attempt, options.max_attempts);
            sleep_fn(options.interval).await;
        }
    }
    warn!(
        "{} not healthy after {} attempts",
        url, options.max_attempts
    );
    false
}
