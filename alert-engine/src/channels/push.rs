//! Push delivery channel
//!
//! Posts notifications to an FCM-style push gateway. The gateway answers
//! with the number of devices it delivered to; that count is informational
//! only.

use crate::channels::ChannelAdapter;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use notify_common::{retry_with_backoff, ChannelKind, NotificationEvent, RetryConfig};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct PushGatewayResponse {
    #[serde(default)]
    delivered: u64,
}

/// Push gateway client and adapter.
pub struct PushChannel {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
    retry: RetryConfig,
}

impl PushChannel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            endpoint: endpoint.into(),
            api_key,
            retry,
        })
    }

    async fn send(&self, event: &NotificationEvent) -> Result<u64> {
        let body = serde_json::to_value(event.to_push_request())?;
        let http_client = self.http_client.clone();
        let endpoint = self.endpoint.clone();
        let api_key = self.api_key.clone();

        retry_with_backoff(&self.retry, move || {
            let http_client = http_client.clone();
            let endpoint = endpoint.clone();
            let api_key = api_key.clone();
            let body = body.clone();
            Box::pin(async move {
                let mut request = http_client.post(&endpoint).json(&body);
                if let Some(key) = &api_key {
                    request = request.bearer_auth(key);
                }
                let response = request.send().await.map_err(EngineError::from)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(EngineError::channel(
                        "push",
                        format!("gateway responded with status {}", status),
                    ));
                }
                // Gateways without a body are treated as zero-count success.
                let delivered = response
                    .json::<PushGatewayResponse>()
                    .await
                    .map(|r| r.delivered)
                    .unwrap_or(0);
                Ok(delivered)
            }) as futures::future::BoxFuture<'static, Result<u64>>
        })
        .await
    }
}

#[async_trait]
impl ChannelAdapter for PushChannel {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Push
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        let delivered = self.send(event).await?;
        debug!(kind = %event.kind, delivered, "push gateway accepted notification");
        Ok(())
    }
}
