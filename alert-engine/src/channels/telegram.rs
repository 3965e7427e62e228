//! Telegram bot messaging channel

use crate::channels::ChannelAdapter;
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use notify_common::{retry_with_backoff, ChannelKind, NotificationEvent, RetryConfig};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest {
    chat_id: String,
    text: String,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct TelegramApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    http_client: Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(TELEGRAM_API_BASE, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
        })
    }

    /// Send a message via the Telegram Bot API
    pub async fn send_message(&self, bot_token: &str, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, bot_token);
        let request = SendMessageRequest {
            chat_id: chat_id.to_string(),
            text: text.to_string(),
            disable_web_page_preview: true,
        };

        let response = self.http_client.post(&url).json(&request).send().await?;
        let status = response.status();
        let api_response: TelegramApiResponse = match response.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                return Err(EngineError::channel(
                    "telegram",
                    format!("unreadable API response (status {}): {}", status, e),
                ));
            }
        };

        if !api_response.ok {
            let description = api_response
                .description
                .unwrap_or_else(|| format!("status {}", status));
            return Err(EngineError::channel("telegram", description));
        }

        debug!(chat_id = %chat_id, "sent Telegram message");
        Ok(())
    }
}

/// Bot messaging adapter: renders the event as text and sends it to every
/// configured chat. One unreachable chat does not block the others; the
/// adapter only errors when no chat could be reached.
pub struct TelegramChannel {
    client: TelegramClient,
    bot_token: String,
    chat_ids: Vec<String>,
    retry: RetryConfig,
}

impl TelegramChannel {
    pub fn new(
        client: TelegramClient,
        bot_token: impl Into<String>,
        chat_ids: Vec<String>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            client,
            bot_token: bot_token.into(),
            chat_ids,
            retry,
        }
    }
}

#[async_trait]
impl ChannelAdapter for TelegramChannel {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Telegram
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        if self.chat_ids.is_empty() {
            return Ok(());
        }

        let text = event.telegram_text();
        let mut delivered = 0usize;
        for chat_id in &self.chat_ids {
            let client = self.client.clone();
            let bot_token = self.bot_token.clone();
            let chat_id_owned = chat_id.clone();
            let text = text.clone();
            let result = retry_with_backoff(&self.retry, move || {
                let client = client.clone();
                let bot_token = bot_token.clone();
                let chat_id = chat_id_owned.clone();
                let text = text.clone();
                Box::pin(async move { client.send_message(&bot_token, &chat_id, &text).await })
                    as futures::future::BoxFuture<'static, Result<()>>
            })
            .await;

            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(chat_id = %chat_id, error = %e, "Telegram delivery failed for chat");
                }
            }
        }

        if delivered == 0 {
            return Err(EngineError::channel(
                "telegram",
                format!("all {} chats unreachable", self.chat_ids.len()),
            ));
        }
        Ok(())
    }
}
