//! Realtime broadcast channel

use crate::channels::ChannelAdapter;
use crate::error::Result;
use crate::registry::ConnectionRegistry;
use async_trait::async_trait;
use notify_common::{ChannelKind, NotificationEvent};
use std::sync::Arc;
use tracing::debug;

/// Fans an event out to every registered websocket subscriber. The registry
/// self-heals on failed handles, so delivery itself never errors.
pub struct RealtimeChannel {
    registry: Arc<ConnectionRegistry>,
}

impl RealtimeChannel {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ChannelAdapter for RealtimeChannel {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Realtime
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        let outcome = self.registry.broadcast(&event.to_server_message());
        debug!(
            kind = %event.kind,
            delivered = outcome.delivered,
            pruned = outcome.pruned,
            "realtime broadcast complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionHandle;
    use notify_common::ServerMessage;
    use serde_json::json;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    #[tokio::test]
    async fn delivers_event_as_notification_message() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (tx, mut rx) = mpsc::channel(4);
        registry.register(ConnectionHandle::new(Uuid::new_v4(), tx));

        let channel = RealtimeChannel::new(registry);
        let event = NotificationEvent::new("alert_triggered", json!({"symbol": "BTCUSDT"}), "test");
        channel.deliver(&event).await.unwrap();

        match rx.try_recv().unwrap() {
            ServerMessage::Notification { kind, payload, .. } => {
                assert_eq!(kind, "alert_triggered");
                assert_eq!(payload["symbol"], "BTCUSDT");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_registry_is_fine() {
        let channel = RealtimeChannel::new(Arc::new(ConnectionRegistry::new()));
        let event = NotificationEvent::new("alert_triggered", json!({}), "test");
        assert!(channel.deliver(&event).await.is_ok());
    }
}
