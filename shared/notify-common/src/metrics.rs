//! Dispatch metrics for the notification pipeline
//!
//! Monotonic counters for notifications sent per source and for channel
//! deliveries per outcome. The registry is an explicitly constructed,
//! injectable component owned by the composition root; counters are never
//! reset during the process lifetime.

use crate::types::{ChannelKind, DeliveryOutcome};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter registry shared by the dispatcher and its channel adapters.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    /// Dispatch calls per source label. Incremented once per
    /// `broadcast_event` call, regardless of per-channel success.
    events_by_source: DashMap<String, AtomicU64>,
    /// Adapter invocations per channel and outcome.
    deliveries: DashMap<(ChannelKind, DeliveryOutcome), AtomicU64>,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one dispatch call for `source`.
    pub fn record_event(&self, source: &str) {
        self.events_by_source
            .entry(source.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Record one adapter invocation outcome.
    pub fn record_delivery(&self, channel: ChannelKind, outcome: DeliveryOutcome) {
        self.deliveries
            .entry((channel, outcome))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Total dispatch calls across all sources.
    pub fn events_total(&self) -> u64 {
        self.events_by_source
            .iter()
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .sum()
    }

    /// Dispatch calls recorded for one source.
    pub fn events_for_source(&self, source: &str) -> u64 {
        self.events_by_source
            .get(source)
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Adapter invocations recorded for one channel and outcome.
    pub fn deliveries_for(&self, channel: ChannelKind, outcome: DeliveryOutcome) -> u64 {
        self.deliveries
            .get(&(channel, outcome))
            .map(|entry| entry.value().load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of all counters for diagnostics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let events_by_source = self
            .events_by_source
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        let deliveries = self
            .deliveries
            .iter()
            .map(|entry| {
                let (channel, outcome) = entry.key();
                (
                    format!("{}/{}", channel, outcome),
                    entry.value().load(Ordering::Relaxed),
                )
            })
            .collect();
        MetricsSnapshot {
            taken_at: Utc::now(),
            events_by_source,
            deliveries,
        }
    }
}

/// Serializable counter snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub events_by_source: HashMap<String, u64>,
    /// Keyed as `{channel}/{outcome}`, e.g. `push/failed`.
    pub deliveries: HashMap<String, u64>,
}
