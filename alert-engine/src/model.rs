//! Domain model: alerts and price snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Trigger condition of an alert.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    Above,
    Below,
    PercentChange,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Above => "above",
            AlertCondition::Below => "below",
            AlertCondition::PercentChange => "percent_change",
        }
    }
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined market alert.
///
/// Created and mutated by the alert CRUD layer; the engine only reads these
/// records and writes the two trigger bookkeeping fields. A triggered alert
/// stays evaluable: re-triggering is governed solely by condition
/// re-evaluation each cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub owner_id: String,
    pub symbol: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub active: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_triggered_price: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    /// Whether this alert participates in the current cycle. The store does
    /// no implicit filtering, so active/expiry checks live here.
    pub fn is_evaluable(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => expires_at > now,
            None => true,
        }
    }

    /// Apply the trigger rule against a fresh snapshot.
    ///
    /// Comparisons use the raw snapshot values; a percent-change alert is
    /// skipped when the feed carries no change figure.
    pub fn should_trigger(&self, snapshot: &PriceSnapshot) -> bool {
        match self.condition {
            AlertCondition::Above => snapshot.raw_price >= self.threshold,
            AlertCondition::Below => snapshot.raw_price <= self.threshold,
            AlertCondition::PercentChange => snapshot
                .raw_change
                .map(|change| change.abs() >= self.threshold)
                .unwrap_or(false),
        }
    }
}

/// One price observation, produced fresh per evaluation and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub symbol: String,
    pub raw_price: f64,
    pub raw_change: Option<f64>,
    pub source: String,
    pub captured_at: DateTime<Utc>,
}
