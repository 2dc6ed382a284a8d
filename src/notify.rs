//! Best-effort lifecycle pings to a health-check service.

use crate::config::HealthCheckUrls;
use crate::error::{BackupError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthEvent {
    Start,
    Success,
    Fail,
}

impl HealthEvent {
    pub fn url<'a>(&self, urls: &'a HealthCheckUrls) -> Option<&'a str> {
        let url = match self {
            HealthEvent::Start => &urls.start,
            HealthEvent::Success => &urls.success,
            HealthEvent::Fail => &urls.fail,
        };
        url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

impl std::fmt::Display for HealthEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthEvent::Start => write!(f, "start"),
            HealthEvent::Success => write!(f, "success"),
            HealthEvent::Fail => write!(f, "fail"),
        }
    }
}

#[async_trait]
pub trait HealthNotifier: Send + Sync {
    async fn ping(&self, url: &str, event: HealthEvent) -> Result<()>;
}

pub struct HttpHealthNotifier {
    client: Client,
}

impl HttpHealthNotifier {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("pgbak/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| BackupError::Config(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HealthNotifier for HttpHealthNotifier {
    async fn ping(&self, url: &str, event: HealthEvent) -> Result<()> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BackupError::Notification(format!("{} ping to {}: {}", event, url, e)))?;

        if !response.status().is_success() {
            return Err(BackupError::Notification(format!(
                "{} ping to {} returned {}",
                event,
                url,
                response.status()
            )));
        }
        Ok(())
    }
}

/// Sends the ping for `event` if the server has a URL for it.
///
/// Failures are logged and swallowed: a health check never decides the
/// outcome of a backup.
pub async fn notify(
    notifier: &dyn HealthNotifier,
    urls: &HealthCheckUrls,
    server_id: &str,
    event: HealthEvent,
) {
    let Some(url) = event.url(urls) else {
        return;
    };

    match notifier.ping(url, event).await {
        Ok(()) => debug!("Sent {} ping for server '{}'", event, server_id),
        Err(e) => warn!("Health check for server '{}' failed: {}", server_id, e),
    }
}
