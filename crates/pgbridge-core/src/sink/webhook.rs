use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

use super::Sink;
use crate::error::PublishError;
use crate::routes::DestinationKind;

/// POSTs the raw notification payload to the route's URL.
///
/// One request per publish, no retries. Any non-2xx status is reported the
/// same way as a transport failure.
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    timeout: Duration,
}

impl WebhookSink {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(Self::build_client(timeout), timeout)
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(config: &crate::config::BridgeConfig) -> Self {
        Self::new(config.webhook_timeout)
    }

    pub fn build_client(timeout: Duration) -> Client {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(20)
            .build()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn kind(&self) -> DestinationKind {
        DestinationKind::Webhook
    }

    async fn publish(&self, channel: &str, target: &str, payload: &str) -> Result<(), PublishError> {
        let resp = self
            .client
            .post(target)
            .header("Content-Type", "application/json")
            .header("User-Agent", concat!("pg-bridge/", env!("CARGO_PKG_VERSION")))
            .timeout(self.timeout)
            .body(payload.to_owned())
            .send()
            .await
            .map_err(|e| PublishError::Transport {
                target: target.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        // Drain the body so the connection can go back to the pool.
        let _ = resp.bytes().await.map_err(|e| PublishError::Transport {
            target: target.to_string(),
            reason: format!("cannot read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(PublishError::Status {
                target: target.to_string(),
                status: status.as_u16(),
            });
        }

        info!(channel, target, status = status.as_u16(), "Webhook responded");
        Ok(())
    }
}
