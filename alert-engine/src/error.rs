//! Error types for the alert engine

use notify_common::IsRetryable;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Redis connection error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Price oracle error: {0}")]
    Oracle(String),

    #[error("Channel {channel} delivery failed: {message}")]
    Channel { channel: String, message: String },

    #[error("Scheduler backend unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("Invalid alert record: {0}")]
    InvalidAlert(String),
}

impl EngineError {
    pub fn channel(channel: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }
}

impl IsRetryable for EngineError {
    fn is_retryable(&self) -> bool {
        match self {
            EngineError::Redis(_)
            | EngineError::Oracle(_)
            | EngineError::SchedulerUnavailable(_)
            | EngineError::Channel { .. } => true,
            // Request construction errors are not retryable; transport
            // failures and timeouts are.
            EngineError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            EngineError::Serialization(_)
            | EngineError::Configuration(_)
            | EngineError::InvalidAlert(_) => false,
        }
    }
}

// Re-export Result type for convenience
pub type Result<T> = std::result::Result<T, EngineError>;
