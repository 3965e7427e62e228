//! Configuration for the alert engine

use serde::{Deserialize, Serialize};

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Redis connection URL. When unset the engine runs without a durable
    /// backend: in-memory alert store, tracing audit trail, fallback
    /// scheduler loop.
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Seconds between evaluation cycles
    #[serde(default = "default_evaluation_interval")]
    pub evaluation_interval_secs: u64,

    /// Seconds between due-job polls of the durable schedule index
    #[serde(default = "default_scheduler_poll")]
    pub scheduler_poll_secs: u64,

    /// TTL of the run lease that caps concurrent cycle executions at one
    #[serde(default = "default_scheduler_lease")]
    pub scheduler_lease_secs: usize,

    /// Base URL of the ticker REST API
    #[serde(default = "default_oracle_base_url")]
    pub oracle_base_url: String,

    /// Price oracle request timeout in milliseconds
    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_ms: u64,

    /// Source label stamped on price snapshots
    #[serde(default = "default_oracle_source")]
    pub oracle_source: String,

    /// Push gateway endpoint; push channel is disabled when unset
    #[serde(default)]
    pub push_endpoint: Option<String>,

    /// Bearer token for the push gateway
    #[serde(default)]
    pub push_api_key: Option<String>,

    /// Push gateway request timeout in milliseconds
    #[serde(default = "default_push_timeout")]
    pub push_timeout_ms: u64,

    /// Telegram bot token; bot channel is disabled when unset
    #[serde(default)]
    pub telegram_bot_token: Option<String>,

    /// Comma-separated Telegram chat ids to notify
    #[serde(default)]
    pub telegram_chat_ids: Option<String>,

    /// Listen address for the realtime websocket transport
    #[serde(default = "default_websocket_bind")]
    pub websocket_bind_addr: String,

    /// Seconds between websocket heartbeat pings
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Seconds without a pong before a websocket peer is dropped
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Redis stream key for the audit trail
    #[serde(default = "default_audit_stream")]
    pub audit_stream_key: String,

    /// Approximate cap on audit stream length
    #[serde(default = "default_audit_maxlen")]
    pub audit_stream_maxlen: usize,

    /// Delivery attempts per channel send (push, bot)
    #[serde(default = "default_channel_attempts")]
    pub channel_retry_attempts: u32,
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Telegram chat ids parsed from the comma-separated setting.
    pub fn telegram_chats(&self) -> Vec<String> {
        self.telegram_chat_ids
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            evaluation_interval_secs: default_evaluation_interval(),
            scheduler_poll_secs: default_scheduler_poll(),
            scheduler_lease_secs: default_scheduler_lease(),
            oracle_base_url: default_oracle_base_url(),
            oracle_timeout_ms: default_oracle_timeout(),
            oracle_source: default_oracle_source(),
            push_endpoint: None,
            push_api_key: None,
            push_timeout_ms: default_push_timeout(),
            telegram_bot_token: None,
            telegram_chat_ids: None,
            websocket_bind_addr: default_websocket_bind(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            connection_timeout_secs: default_connection_timeout(),
            audit_stream_key: default_audit_stream(),
            audit_stream_maxlen: default_audit_maxlen(),
            channel_retry_attempts: default_channel_attempts(),
        }
    }
}

fn default_evaluation_interval() -> u64 {
    60
}

fn default_scheduler_poll() -> u64 {
    5
}

fn default_scheduler_lease() -> usize {
    120
}

fn default_oracle_base_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_oracle_timeout() -> u64 {
    5000
}

fn default_oracle_source() -> String {
    "binance".to_string()
}

fn default_push_timeout() -> u64 {
    5000
}

fn default_websocket_bind() -> String {
    "0.0.0.0:9301".to_string()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_connection_timeout() -> u64 {
    90
}

fn default_audit_stream() -> String {
    "alerts:audit".to_string()
}

fn default_audit_maxlen() -> usize {
    10_000
}

fn default_channel_attempts() -> u32 {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_knob() {
        let config = EngineConfig::default();
        assert!(config.redis_url.is_none());
        assert_eq!(config.evaluation_interval_secs, 60);
        assert_eq!(config.oracle_base_url, "https://api.binance.com");
        assert!(config.telegram_chats().is_empty());
    }

    #[test]
    fn telegram_chats_parse_and_trim() {
        let config = EngineConfig {
            telegram_chat_ids: Some(" 1001, 1002 ,,1003".to_string()),
            ..Default::default()
        };
        assert_eq!(config.telegram_chats(), vec!["1001", "1002", "1003"]);
    }
}
