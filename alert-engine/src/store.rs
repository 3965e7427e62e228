//! Alert persistence interface
//!
//! The CRUD side of alerts belongs to another service; this engine only
//! lists alert records and writes the trigger bookkeeping fields. The store
//! returns records as-is; active/expiry filtering is the evaluator's job.

use crate::error::{EngineError, Result};
use crate::model::Alert;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

const ALERT_KEY_PREFIX: &str = "alerts:alert:";
const SCAN_BATCH: u32 = 100;

/// Decode one stored alert record. Malformed JSON is a contract violation
/// from the CRUD side and surfaces as [`EngineError::InvalidAlert`].
fn parse_alert(key: &str, raw: &str) -> Result<Alert> {
    serde_json::from_str(raw).map_err(|e| EngineError::InvalidAlert(format!("{}: {}", key, e)))
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Fetch all alert records, in store order, without filtering.
    async fn list_alerts(&self) -> Result<Vec<Alert>>;

    /// Persist the trigger timestamp and price for one alert. Returns the
    /// updated record, or `None` when the alert no longer exists.
    async fn mark_triggered(
        &self,
        alert_id: Uuid,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>>;
}

/// Redis-backed alert store. Records are JSON values under
/// `alerts:alert:{id}`.
#[derive(Clone)]
pub struct RedisAlertStore {
    conn: ConnectionManager,
}

impl RedisAlertStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn alert_key(alert_id: Uuid) -> String {
        format!("{}{}", ALERT_KEY_PREFIX, alert_id)
    }

    async fn scan_alert_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor = 0u64;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{}*", ALERT_KEY_PREFIX))
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(EngineError::Redis)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        // SCAN gives no ordering guarantee; sort for a stable cycle order.
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl AlertStore for RedisAlertStore {
    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        let keys = self.scan_alert_keys().await?;
        let mut conn = self.conn.clone();
        let mut alerts = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await.map_err(EngineError::Redis)?;
            let Some(raw) = raw else {
                // Deleted between SCAN and GET.
                continue;
            };
            match parse_alert(&key, &raw) {
                Ok(alert) => alerts.push(alert),
                Err(e) => {
                    warn!(error = %e, "skipping malformed alert record");
                }
            }
        }
        debug!(count = alerts.len(), "listed alert records");
        Ok(alerts)
    }

    async fn mark_triggered(
        &self,
        alert_id: Uuid,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let key = Self::alert_key(alert_id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await.map_err(EngineError::Redis)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        // A record that no longer parses is a contract violation; let the
        // evaluator's containment log it against the alert and move on.
        let mut alert = parse_alert(&key, &raw)?;
        alert.last_triggered_at = Some(at);
        alert.last_triggered_price = Some(price);
        let updated = serde_json::to_string(&alert)?;
        conn.set::<_, _, ()>(&key, updated)
            .await
            .map_err(EngineError::Redis)?;
        Ok(Some(alert))
    }
}

/// In-memory alert store for Redis-less runs and tests.
#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: RwLock<HashMap<Uuid, Alert>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, alert: Alert) {
        self.alerts.write().insert(alert.id, alert);
    }

    pub fn get(&self, alert_id: &Uuid) -> Option<Alert> {
        self.alerts.read().get(alert_id).cloned()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn list_alerts(&self) -> Result<Vec<Alert>> {
        let mut alerts: Vec<Alert> = self.alerts.read().values().cloned().collect();
        alerts.sort_by_key(|a| (a.created_at, a.id));
        Ok(alerts)
    }

    async fn mark_triggered(
        &self,
        alert_id: Uuid,
        price: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let mut alerts = self.alerts.write();
        let Some(alert) = alerts.get_mut(&alert_id) else {
            return Ok(None);
        };
        alert.last_triggered_at = Some(at);
        alert.last_triggered_price = Some(price);
        Ok(Some(alert.clone()))
    }
}
