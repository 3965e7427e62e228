//! Shared notification contracts for the vigil alert pipeline
//!
//! This library defines the types that cross the boundary between the alert
//! evaluator and the delivery channels: channel identifiers, the notification
//! event payload model with its channel-specific conversions, the dispatch
//! metrics registry, and retry helpers.

pub mod metrics;
pub mod payloads;
pub mod retry;
pub mod types;

// Re-export commonly used types
pub use metrics::{DispatchMetrics, MetricsSnapshot};
pub use payloads::{ClientMessage, NotificationEvent, PushRequest, ServerMessage};
pub use retry::{retry_with_backoff, IsRetryable, RetryConfig};
pub use types::{ChannelKind, DeliveryOutcome, DeliveryStatus};
