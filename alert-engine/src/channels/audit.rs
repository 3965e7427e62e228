//! Audit trail
//!
//! Fire-and-forget audit records. Implementations never fail into the
//! caller: a broken audit backend is logged and dropped, it does not block
//! or corrupt a dispatch call.

use crate::channels::ChannelAdapter;
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use notify_common::{ChannelKind, NotificationEvent};
use redis::aio::ConnectionManager;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record one audit entry.
    async fn log_event(&self, actor: &str, event_kind: &str, metadata: Value);
}

/// Audit trail on a capped Redis stream. The append runs in a spawned task
/// so a stalled Redis cannot hold up a dispatch call.
pub struct RedisAuditLog {
    conn: ConnectionManager,
    stream_key: String,
    maxlen: usize,
}

impl RedisAuditLog {
    pub fn new(conn: ConnectionManager, stream_key: impl Into<String>, maxlen: usize) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
            maxlen,
        }
    }
}

#[async_trait]
impl AuditLog for RedisAuditLog {
    async fn log_event(&self, actor: &str, event_kind: &str, metadata: Value) {
        let mut conn = self.conn.clone();
        let stream_key = self.stream_key.clone();
        let maxlen = self.maxlen;
        let actor = actor.to_string();
        let event_kind = event_kind.to_string();
        let metadata = metadata.to_string();
        let at = Utc::now().to_rfc3339();

        tokio::spawn(async move {
            let result: redis::RedisResult<String> = redis::cmd("XADD")
                .arg(&stream_key)
                .arg("MAXLEN")
                .arg("~")
                .arg(maxlen)
                .arg("*")
                .arg("actor")
                .arg(&actor)
                .arg("kind")
                .arg(&event_kind)
                .arg("metadata")
                .arg(&metadata)
                .arg("at")
                .arg(&at)
                .query_async(&mut conn)
                .await;
            if let Err(e) = result {
                warn!(kind = %event_kind, error = %e, "audit stream append failed");
            }
        });
    }
}

/// Audit trail on the structured log, for Redis-less deployments and tests.
#[derive(Default)]
pub struct TracingAuditLog;

impl TracingAuditLog {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log_event(&self, actor: &str, event_kind: &str, metadata: Value) {
        info!(target: "audit", actor = %actor, kind = %event_kind, metadata = %metadata, "audit event");
    }
}

/// The audit trail as the last channel in the dispatch fan-out.
pub struct AuditChannel {
    audit: Arc<dyn AuditLog>,
}

impl AuditChannel {
    pub fn new(audit: Arc<dyn AuditLog>) -> Self {
        Self { audit }
    }
}

#[async_trait]
impl ChannelAdapter for AuditChannel {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Audit
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<()> {
        self.audit
            .log_event(&event.source, &event.kind, event.payload.clone())
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingAuditLog {
        entries: Mutex<Vec<(String, String, Value)>>,
    }

    #[async_trait]
    impl AuditLog for RecordingAuditLog {
        async fn log_event(&self, actor: &str, event_kind: &str, metadata: Value) {
            self.entries
                .lock()
                .push((actor.to_string(), event_kind.to_string(), metadata));
        }
    }

    #[tokio::test]
    async fn audit_channel_records_source_kind_and_payload() {
        let audit = Arc::new(RecordingAuditLog::default());
        let channel = AuditChannel::new(audit.clone());
        let event = NotificationEvent::new(
            "alert_triggered",
            json!({"symbol": "BTCUSDT"}),
            "alert_evaluator",
        );

        channel.deliver(&event).await.unwrap();

        let entries = audit.entries.lock();
        assert_eq!(entries.len(), 1);
        let (actor, kind, metadata) = &entries[0];
        assert_eq!(actor, "alert_evaluator");
        assert_eq!(kind, "alert_triggered");
        assert_eq!(metadata["symbol"], "BTCUSDT");
    }

    #[tokio::test]
    async fn tracing_audit_log_never_fails() {
        TracingAuditLog::new()
            .log_event("system", "alert_triggered", json!({}))
            .await;
    }
}
