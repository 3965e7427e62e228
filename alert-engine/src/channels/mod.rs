//! Delivery channel adapters
//!
//! One adapter per external channel. Each adapter owns its transport and its
//! own retry budget; the dispatcher isolates adapter failures from each
//! other, so nothing here needs to know about sibling channels.

pub mod audit;
pub mod push;
pub mod realtime;
pub mod telegram;

use crate::error::Result;
use async_trait::async_trait;
use notify_common::{ChannelKind, NotificationEvent};

pub use audit::{AuditChannel, AuditLog, RedisAuditLog, TracingAuditLog};
pub use push::PushChannel;
pub use realtime::RealtimeChannel;
pub use telegram::{TelegramChannel, TelegramClient};

/// A delivery mechanism for one notification channel.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// The channel this adapter delivers to.
    fn channel(&self) -> ChannelKind;

    /// Deliver one event. Errors are contained by the dispatcher; they never
    /// affect sibling channels or the caller.
    async fn deliver(&self, event: &NotificationEvent) -> Result<()>;
}
