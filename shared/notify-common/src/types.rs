//! Core types for the notification pipeline
//!
//! Channel identifiers and per-channel delivery outcomes shared by the
//! dispatcher, the channel adapters, and the metrics registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification channels supported by the dispatcher, in fan-out order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Realtime,
    Push,
    Telegram,
    Audit,
}

impl ChannelKind {
    /// Get channel name as lowercase string
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Realtime => "realtime",
            ChannelKind::Push => "push",
            ChannelKind::Telegram => "telegram",
            ChannelKind::Audit => "audit",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one adapter invocation within a dispatch call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    Delivered,
    Failed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one channel delivery attempt, collected per dispatch call for
/// diagnostics. Never fed back into retry decisions after the call returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    pub channel: ChannelKind,
    pub outcome: DeliveryOutcome,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl DeliveryStatus {
    pub fn delivered(channel: ChannelKind) -> Self {
        Self {
            channel,
            outcome: DeliveryOutcome::Delivered,
            error_message: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(channel: ChannelKind, error: impl Into<String>) -> Self {
        Self {
            channel,
            outcome: DeliveryOutcome::Failed,
            error_message: Some(error.into()),
            completed_at: Utc::now(),
        }
    }
}
