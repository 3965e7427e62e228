//! Notification dispatcher
//!
//! Fans a single logical event out to every configured channel adapter in a
//! fixed order, isolating failures per adapter: one channel failing is
//! logged and counted, and the remaining channels still run. Nothing raised
//! by an adapter escapes to the caller: the dispatch call is an error
//! containment boundary.

use crate::channels::{AuditLog, ChannelAdapter};
use crate::error::Result;
use notify_common::{
    DeliveryOutcome, DeliveryStatus, DispatchMetrics, NotificationEvent,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-channel outcomes of one dispatch call, for diagnostics only.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub outcomes: Vec<DeliveryStatus>,
}

impl DispatchReport {
    pub fn delivered_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|status| status.outcome == DeliveryOutcome::Delivered)
            .count()
    }
}

pub struct NotificationDispatcher {
    /// Adapters in invocation order: realtime, push, bot, audit.
    adapters: Vec<Arc<dyn ChannelAdapter>>,
    audit: Arc<dyn AuditLog>,
    metrics: Arc<DispatchMetrics>,
}

impl NotificationDispatcher {
    pub fn new(
        adapters: Vec<Arc<dyn ChannelAdapter>>,
        audit: Arc<dyn AuditLog>,
        metrics: Arc<DispatchMetrics>,
    ) -> Self {
        Self {
            adapters,
            audit,
            metrics,
        }
    }

    /// Fan one event out to every configured channel.
    ///
    /// The sent counter is incremented exactly once per call. It counts
    /// intent-to-notify, not per-channel success.
    pub async fn broadcast_event(&self, kind: &str, payload: Value, source: &str) -> DispatchReport {
        let event = NotificationEvent::new(kind, payload, source);
        let mut outcomes = Vec::with_capacity(self.adapters.len());

        for adapter in &self.adapters {
            let channel = adapter.channel();
            match adapter.deliver(&event).await {
                Ok(()) => {
                    self.metrics
                        .record_delivery(channel, DeliveryOutcome::Delivered);
                    outcomes.push(DeliveryStatus::delivered(channel));
                }
                Err(e) => {
                    warn!(channel = %channel, kind = %event.kind, error = %e, "channel delivery failed");
                    self.metrics
                        .record_delivery(channel, DeliveryOutcome::Failed);
                    outcomes.push(DeliveryStatus::failed(channel, e.to_string()));
                }
            }
        }

        let payload_bytes = event.approx_payload_size();
        self.audit
            .log_event(
                source,
                &event.kind,
                json!({
                    "payload_bytes": payload_bytes,
                    "channels": outcomes
                        .iter()
                        .map(|status| json!({
                            "channel": status.channel.as_str(),
                            "outcome": status.outcome.as_str(),
                        }))
                        .collect::<Vec<_>>(),
                }),
            )
            .await;
        self.metrics.record_event(source);

        debug!(
            kind = %event.kind,
            source = %event.source,
            delivered = outcomes
                .iter()
                .filter(|s| s.outcome == DeliveryOutcome::Delivered)
                .count(),
            channels = outcomes.len(),
            "event dispatched"
        );

        DispatchReport { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::AuditLog;
    use crate::error::EngineError;
    use async_trait::async_trait;
    use notify_common::ChannelKind;
    use parking_lot::Mutex;

    struct RecordingAdapter {
        channel: ChannelKind,
        fail: bool,
        invocations: Arc<Mutex<Vec<ChannelKind>>>,
    }

    #[async_trait]
    impl ChannelAdapter for RecordingAdapter {
        fn channel(&self) -> ChannelKind {
            self.channel
        }

        async fn deliver(&self, _event: &NotificationEvent) -> Result<()> {
            self.invocations.lock().push(self.channel);
            if self.fail {
                Err(EngineError::channel(self.channel.as_str(), "boom"))
            } else {
                Ok(())
            }
        }
    }

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

    fn dispatcher_with(
        fail_channels: &[ChannelKind],
    ) -> (
        NotificationDispatcher,
        Arc<Mutex<Vec<ChannelKind>>>,
        Arc<RecordingAuditLog>,
        Arc<DispatchMetrics>,
    ) {
        let invocations = Arc::new(Mutex::new(Vec::new()));
        let adapters: Vec<Arc<dyn ChannelAdapter>> = [
            ChannelKind::Realtime,
            ChannelKind::Push,
            ChannelKind::Telegram,
            ChannelKind::Audit,
        ]
        .into_iter()
        .map(|channel| {
            Arc::new(RecordingAdapter {
                channel,
                fail: fail_channels.contains(&channel),
                invocations: invocations.clone(),
            }) as Arc<dyn ChannelAdapter>
        })
        .collect();
        let audit = Arc::new(RecordingAuditLog::default());
        let metrics = Arc::new(DispatchMetrics::new());
        let dispatcher =
            NotificationDispatcher::new(adapters, audit.clone(), metrics.clone());
        (dispatcher, invocations, audit, metrics)
    }

    #[tokio::test]
    async fn all_channels_run_in_fixed_order() {
        let (dispatcher, invocations, _audit, _metrics) = dispatcher_with(&[]);
        dispatcher
            .broadcast_event("alert_triggered", json!({"symbol": "BTCUSDT"}), "system")
            .await;

        assert_eq!(
            *invocations.lock(),
            vec![
                ChannelKind::Realtime,
                ChannelKind::Push,
                ChannelKind::Telegram,
                ChannelKind::Audit,
            ]
        );
    }

    #[tokio::test]
    async fn failing_channel_does_not_skip_later_channels() {
        let (dispatcher, invocations, _audit, metrics) =
            dispatcher_with(&[ChannelKind::Realtime]);
        let report = dispatcher
            .broadcast_event("alert_triggered", json!({}), "system")
            .await;

        assert_eq!(invocations.lock().len(), 4);
        assert_eq!(report.delivered_count(), 3);
        assert_eq!(
            metrics.deliveries_for(ChannelKind::Realtime, DeliveryOutcome::Failed),
            1
        );
        assert_eq!(
            metrics.deliveries_for(ChannelKind::Push, DeliveryOutcome::Delivered),
            1
        );
    }

    #[tokio::test]
    async fn sent_counter_increments_once_regardless_of_failures() {
        let (dispatcher, _invocations, _audit, metrics) =
            dispatcher_with(&[ChannelKind::Push, ChannelKind::Telegram]);
        dispatcher
            .broadcast_event("alert_triggered", json!({}), "alert_evaluator")
            .await;
        assert_eq!(metrics.events_for_source("alert_evaluator"), 1);

        let (dispatcher, _invocations, _audit, metrics) = dispatcher_with(&[
            ChannelKind::Realtime,
            ChannelKind::Push,
            ChannelKind::Telegram,
            ChannelKind::Audit,
        ]);
        dispatcher
            .broadcast_event("alert_triggered", json!({}), "alert_evaluator")
            .await;
        assert_eq!(metrics.events_for_source("alert_evaluator"), 1);
    }

    #[tokio::test]
    async fn audit_entry_carries_kind_and_payload_size() {
        let (dispatcher, _invocations, audit, _metrics) = dispatcher_with(&[]);
        dispatcher
            .broadcast_event("alert_triggered", json!({"symbol": "BTCUSDT"}), "system")
            .await;

        let entries = audit.entries.lock();
        assert_eq!(entries.len(), 1);
        let (actor, kind, metadata) = &entries[0];
        assert_eq!(actor, "system");
        assert_eq!(kind, "alert_triggered");
        assert!(metadata["payload_bytes"].as_u64().unwrap() > 0);
        assert_eq!(metadata["channels"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn default_source_usage_is_tracked_per_source() {
        let (dispatcher, _invocations, _audit, metrics) = dispatcher_with(&[]);
        dispatcher
            .broadcast_event("ai_insight", json!({"note": "x"}), "insight_producer")
            .await;
        dispatcher
            .broadcast_event("alert_triggered", json!({}), "alert_evaluator")
            .await;

        assert_eq!(metrics.events_for_source("insight_producer"), 1);
        assert_eq!(metrics.events_for_source("alert_evaluator"), 1);
        assert_eq!(metrics.events_total(), 2);
    }
}
