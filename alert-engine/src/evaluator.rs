//! Alert evaluator
//!
//! Runs one full evaluation cycle: list alert records, filter out inactive
//! and expired ones, resolve a fresh price snapshot per alert, apply the
//! trigger rule, persist trigger bookkeeping, and dispatch a notification
//! for every trigger. The cycle is an error containment boundary: a single
//! bad alert or a flaky feed never aborts the rest of the cycle, and nothing
//! escapes to the scheduler.

use crate::dispatcher::NotificationDispatcher;
use crate::error::Result;
use crate::model::Alert;
use crate::oracle::PriceOracle;
use crate::store::AlertStore;
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const EVALUATOR_SOURCE: &str = "alert_evaluator";

/// Counts for one evaluation cycle, for logging and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Alerts that passed the active/expiry filter.
    pub evaluated: usize,
    /// Alerts whose condition fired and were dispatched.
    pub triggered: usize,
    /// Alerts excluded by the active/expiry filter.
    pub skipped: usize,
    /// Alerts whose processing hit an unexpected error.
    pub failed: usize,
}

pub struct AlertEvaluator {
    store: Arc<dyn AlertStore>,
    oracle: Arc<dyn PriceOracle>,
    dispatcher: Arc<NotificationDispatcher>,
    /// Guards against overlapping cycles from the scheduler and manual
    /// triggers; a contended call skips instead of queueing.
    in_flight: Mutex<()>,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        oracle: Arc<dyn PriceOracle>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            store,
            oracle,
            dispatcher,
            in_flight: Mutex::new(()),
        }
    }

    /// Run one evaluation cycle over all alert records.
    pub async fn evaluate_alerts(&self) -> CycleSummary {
        let Ok(_guard) = self.in_flight.try_lock() else {
            warn!("evaluation cycle already in flight, skipping this invocation");
            return CycleSummary::default();
        };

        let alerts = match self.store.list_alerts().await {
            Ok(alerts) => alerts,
            Err(e) => {
                warn!(error = %e, "failed to list alerts, skipping cycle");
                return CycleSummary::default();
            }
        };

        let now = Utc::now();
        let mut summary = CycleSummary::default();
        for alert in &alerts {
            if !alert.is_evaluable(now) {
                summary.skipped += 1;
                continue;
            }
            summary.evaluated += 1;
            match self.process_alert(alert).await {
                Ok(true) => summary.triggered += 1,
                Ok(false) => {}
                Err(e) => {
                    summary.failed += 1;
                    error!(alert_id = %alert.id, error = %e, "alert evaluation failed, continuing cycle");
                }
            }
        }

        info!(
            evaluated = summary.evaluated,
            triggered = summary.triggered,
            skipped = summary.skipped,
            failed = summary.failed,
            "evaluation cycle complete"
        );
        summary
    }

    async fn process_alert(&self, alert: &Alert) -> Result<bool> {
        let snapshot = match self.oracle.get_price(&alert.symbol).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(alert_id = %alert.id, symbol = %alert.symbol, "no usable price, skipping alert this cycle");
                return Ok(false);
            }
            Err(e) => {
                // Transient feed failure; treated exactly like missing data.
                warn!(alert_id = %alert.id, symbol = %alert.symbol, error = %e, "price lookup failed, skipping alert this cycle");
                return Ok(false);
            }
        };

        if !alert.should_trigger(&snapshot) {
            return Ok(false);
        }

        let marked = self
            .store
            .mark_triggered(alert.id, snapshot.raw_price, snapshot.captured_at)
            .await?;
        if marked.is_none() {
            warn!(alert_id = %alert.id, "alert disappeared before trigger was persisted, not dispatching");
            return Ok(false);
        }

        info!(
            alert_id = %alert.id,
            symbol = %alert.symbol,
            condition = %alert.condition,
            threshold = alert.threshold,
            price = snapshot.raw_price,
            "alert triggered"
        );

        let payload = json!({
            "alert_id": alert.id,
            "owner_id": alert.owner_id,
            "symbol": alert.symbol,
            "condition": alert.condition.as_str(),
            "threshold": alert.threshold,
            "price": snapshot.raw_price,
            "raw_change": snapshot.raw_change,
            "price_source": snapshot.source,
            "captured_at": snapshot.captured_at,
        });
        self.dispatcher
            .broadcast_event("alert_triggered", payload, EVALUATOR_SOURCE)
            .await;
        Ok(true)
    }
}
