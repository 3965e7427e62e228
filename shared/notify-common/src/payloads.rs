//! Notification event model and channel payload conversions
//!
//! A [`NotificationEvent`] is the single logical event handed to the
//! dispatcher; each delivery channel renders it into its own wire shape via
//! the conversion methods here. The payload is a plain JSON object whose
//! field names are a collaboration contract with the transport and push
//! layers, not a binary format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One logical notification, owned by the dispatch call that creates it.
/// Not retried after the call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    /// Event kind tag, e.g. `alert_triggered` or `ai_insight`.
    pub kind: String,
    /// Structured payload; always a JSON object in practice.
    pub payload: Value,
    /// Label of the subsystem that produced the event.
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(kind: impl Into<String>, payload: Value, source: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            payload,
            source: source.into(),
            created_at: Utc::now(),
        }
    }

    /// Approximate serialized payload size in bytes, used for audit entries.
    pub fn approx_payload_size(&self) -> usize {
        serde_json::to_vec(&self.payload).map(|b| b.len()).unwrap_or(0)
    }

    /// Render the event as the realtime websocket wire message.
    pub fn to_server_message(&self) -> ServerMessage {
        ServerMessage::Notification {
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            source: self.source.clone(),
            timestamp: self.created_at,
        }
    }

    /// Render the event as a push gateway request body.
    pub fn to_push_request(&self) -> PushRequest {
        PushRequest {
            title: self.headline(),
            body: self.summary_line(),
            event_kind: self.kind.clone(),
            data: self.payload.clone(),
        }
    }

    /// Render the event as plain Telegram message text.
    pub fn telegram_text(&self) -> String {
        let mut text = self.headline();
        let summary = self.summary_line();
        if !summary.is_empty() {
            text.push('\n');
            text.push_str(&summary);
        }
        text
    }

    fn headline(&self) -> String {
        if self.kind == "alert_triggered" {
            if let Some(symbol) = self.payload_str("symbol") {
                return format!("Price alert: {}", symbol);
            }
        }
        self.kind.replace('_', " ")
    }

    fn summary_line(&self) -> String {
        let mut parts = Vec::new();
        if let Some(price) = self.payload_f64("price") {
            parts.push(format!("price {}", price));
        }
        if let (Some(condition), Some(threshold)) =
            (self.payload_str("condition"), self.payload_f64("threshold"))
        {
            parts.push(format!("{} {}", condition, threshold));
        }
        if let Some(change) = self.payload_f64("raw_change") {
            parts.push(format!("24h change {}%", change));
        }
        parts.join(", ")
    }

    fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }

    fn payload_f64(&self, field: &str) -> Option<f64> {
        self.payload.get(field).and_then(|v| v.as_f64())
    }
}

/// Request body posted to the push gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub title: String,
    pub body: String,
    pub event_kind: String,
    pub data: Value,
}

/// Messages sent to realtime websocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Notification {
        kind: String,
        payload: Value,
        source: String,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

/// Messages accepted from realtime websocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}
