//! Scheduler core
//!
//! Drives the alert evaluator on a fixed interval. Preferred mode keeps the
//! recurring job in a durable Redis schedule index (sorted set member with a
//! next-due score) shared by every engine instance: registration is ZADD NX
//! (one job entry, never duplicated), a SET NX EX run lease caps concurrent
//! executions at one, and the due score is advanced from the current time
//! before each run so missed runs collapse into a single catch-up execution.
//! When no durable backend is configured or the backend is unreachable at
//! startup, the core degrades to a single in-process interval loop instead
//! of failing the process.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::evaluator::AlertEvaluator;
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EVALUATION_JOB_ID: &str = "alerts:evaluate";
const SCHEDULE_ZSET: &str = "alerts:schedule:recurring";
const RUN_LEASE_PREFIX: &str = "alerts:schedule:lease:";
const DUE_BATCH: usize = 8;

/// Minimal sorted-set and key surface the durable scheduler needs.
/// Scores are unix millisecond timestamps.
#[async_trait]
pub trait SchedulerStore: Send + Sync {
    async fn zadd_nx(&self, key: &str, member: &str, score: i64) -> Result<()>;
    async fn zadd_xx(&self, key: &str, member: &str, score: i64) -> Result<()>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>>;
    async fn zrem(&self, key: &str, member: &str) -> Result<()>;
    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>>;
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: usize) -> Result<bool>;
    async fn del(&self, key: &str) -> Result<()>;
}

/// Redis-backed schedule index.
#[derive(Clone)]
pub struct RedisSchedulerStore {
    conn: ConnectionManager,
}

impl RedisSchedulerStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl SchedulerStore for RedisSchedulerStore {
    async fn zadd_nx(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zadd_xx(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(key)
            .arg("XX")
            .arg(score)
            .arg(member)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = conn.zscore(key, member).await?;
        Ok(score.map(|s| s as i64))
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn zrangebyscore_withscores(
        &self,
        key: &str,
        max_score: i64,
        limit: usize,
    ) -> Result<Vec<(String, i64)>> {
        let mut conn = self.conn.clone();
        let raw: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(max_score)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        Ok(raw
            .into_iter()
            .map(|(member, score)| (member, score as i64))
            .collect())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: usize) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut conn)
            .await?;
        Ok(result.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    Durable,
    Fallback,
}

struct ActiveLoop {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
    mode: SchedulerMode,
}

struct Inner {
    state: SchedulerState,
    active: Option<ActiveLoop>,
}

pub struct SchedulerCore {
    evaluator: Arc<AlertEvaluator>,
    store: Option<Arc<dyn SchedulerStore>>,
    interval: Duration,
    poll: Duration,
    lease_secs: usize,
    inner: Mutex<Inner>,
}

impl SchedulerCore {
    pub fn new(
        config: &EngineConfig,
        evaluator: Arc<AlertEvaluator>,
        store: Option<Arc<dyn SchedulerStore>>,
    ) -> Self {
        Self::with_timing(
            evaluator,
            store,
            Duration::from_secs(config.evaluation_interval_secs),
            Duration::from_secs(config.scheduler_poll_secs),
            config.scheduler_lease_secs,
        )
    }

    pub fn with_timing(
        evaluator: Arc<AlertEvaluator>,
        store: Option<Arc<dyn SchedulerStore>>,
        interval: Duration,
        poll: Duration,
        lease_secs: usize,
    ) -> Self {
        Self {
            evaluator,
            store,
            interval,
            poll,
            lease_secs,
            inner: Mutex::new(Inner {
                state: SchedulerState::Stopped,
                active: None,
            }),
        }
    }

    pub async fn state(&self) -> SchedulerState {
        self.inner.lock().await.state
    }

    pub async fn mode(&self) -> Option<SchedulerMode> {
        self.inner.lock().await.active.as_ref().map(|a| a.mode)
    }

    /// Start the recurring evaluation job. Repeated calls while running are
    /// no-ops: exactly one loop/registration stays active.
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SchedulerState::Running | SchedulerState::Starting => {
                info!("scheduler already running, ignoring start");
                return Ok(());
            }
            SchedulerState::Stopping => {
                warn!("scheduler is stopping, ignoring start");
                return Ok(());
            }
            SchedulerState::Stopped => {}
        }
        inner.state = SchedulerState::Starting;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let active = match &self.store {
            Some(store) => match self.register_job(store.as_ref()).await {
                Ok(()) => {
                    info!(
                        interval_secs = self.interval.as_secs(),
                        "registered recurring evaluation job in durable schedule index"
                    );
                    let handle = tokio::spawn(durable_loop(
                        store.clone(),
                        self.evaluator.clone(),
                        self.interval,
                        self.poll,
                        self.lease_secs,
                        shutdown_rx,
                    ));
                    ActiveLoop {
                        handle,
                        shutdown: shutdown_tx,
                        mode: SchedulerMode::Durable,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "durable scheduler backend unreachable, degrading to in-process loop");
                    let handle = tokio::spawn(fallback_loop(
                        self.evaluator.clone(),
                        self.interval,
                        shutdown_rx,
                    ));
                    ActiveLoop {
                        handle,
                        shutdown: shutdown_tx,
                        mode: SchedulerMode::Fallback,
                    }
                }
            },
            None => {
                info!("no durable scheduler backend configured, using in-process loop");
                let handle = tokio::spawn(fallback_loop(
                    self.evaluator.clone(),
                    self.interval,
                    shutdown_rx,
                ));
                ActiveLoop {
                    handle,
                    shutdown: shutdown_tx,
                    mode: SchedulerMode::Fallback,
                }
            }
        };

        inner.active = Some(active);
        inner.state = SchedulerState::Running;
        Ok(())
    }

    async fn register_job(&self, store: &dyn SchedulerStore) -> Result<()> {
        let next_due = Utc::now().timestamp_millis() + self.interval.as_millis() as i64;
        // ZADD NX leaves an existing registration untouched: re-registration
        // never duplicates the job and never disturbs a live schedule, so an
        // overdue entry still fires its one catch-up run.
        store
            .zadd_nx(SCHEDULE_ZSET, EVALUATION_JOB_ID, next_due)
            .await
    }

    /// Stop the scheduler. The durable mode deregisters and cancels its poll
    /// loop without waiting for in-flight work; the fallback loop is
    /// signalled and awaited for orderly termination.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let Some(active) = inner.active.take() else {
            inner.state = SchedulerState::Stopped;
            return;
        };
        inner.state = SchedulerState::Stopping;

        let _ = active.shutdown.send(true);
        match active.mode {
            SchedulerMode::Durable => {
                if let Some(store) = &self.store {
                    if let Err(e) = store.zrem(SCHEDULE_ZSET, EVALUATION_JOB_ID).await {
                        warn!(error = %e, "failed to deregister evaluation job");
                    }
                }
                active.handle.abort();
                // Swallow the expected cancellation outcome.
                let _ = active.handle.await;
            }
            SchedulerMode::Fallback => {
                let _ = active.handle.await;
            }
        }

        inner.state = SchedulerState::Stopped;
        info!("scheduler stopped");
    }
}

async fn durable_loop(
    store: Arc<dyn SchedulerStore>,
    evaluator: Arc<AlertEvaluator>,
    interval: Duration,
    poll: Duration,
    lease_secs: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("durable scheduler loop cancelled");
                break;
            }
            _ = ticker.tick() => {}
        }
        if let Err(e) = run_due_jobs(store.as_ref(), &evaluator, interval, lease_secs).await {
            warn!(error = %e, "schedule poll failed");
        }
    }
}

async fn run_due_jobs(
    store: &dyn SchedulerStore,
    evaluator: &AlertEvaluator,
    interval: Duration,
    lease_secs: usize,
) -> Result<()> {
    let now = Utc::now().timestamp_millis();
    let due = store
        .zrangebyscore_withscores(SCHEDULE_ZSET, now, DUE_BATCH)
        .await?;
    for (job_id, _scheduled_for) in due {
        if job_id != EVALUATION_JOB_ID {
            continue;
        }
        let lease_key = format!("{}{}", RUN_LEASE_PREFIX, job_id);
        match store.set_nx_ex(&lease_key, "held", lease_secs).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(job = %job_id, "run lease held elsewhere, skipping");
                continue;
            }
            Err(e) => {
                warn!(job = %job_id, error = %e, "failed to acquire run lease");
                continue;
            }
        }
        // Advance from the current time, not the stale score: runs missed
        // while the process was down collapse into this one catch-up.
        if let Err(e) = store
            .zadd_xx(SCHEDULE_ZSET, &job_id, now + interval.as_millis() as i64)
            .await
        {
            warn!(job = %job_id, error = %e, "failed to advance schedule");
        }
        evaluator.evaluate_alerts().await;
        if let Err(e) = store.del(&lease_key).await {
            warn!(job = %job_id, error = %e, "failed to release run lease");
        }
    }
    Ok(())
}

async fn fallback_loop(
    evaluator: Arc<AlertEvaluator>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = interval.as_secs(),
        "in-process evaluation loop started"
    );
    // First run happens one full interval after start.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("in-process evaluation loop cancelled");
                break;
            }
            _ = ticker.tick() => {
                evaluator.evaluate_alerts().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::AuditLog;
    use crate::dispatcher::NotificationDispatcher;
    use crate::error::EngineError;
    use crate::model::PriceSnapshot;
    use crate::oracle::PriceOracle;
    use crate::store::MemoryAlertStore;
    use notify_common::DispatchMetrics;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::Value;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingOracle {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PriceOracle for CountingOracle {
        async fn get_price(&self, symbol: &str) -> Result<Option<PriceSnapshot>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Some(PriceSnapshot {
                symbol: symbol.to_string(),
                raw_price: 1.0,
                raw_change: None,
                source: "test".to_string(),
                captured_at: Utc::now(),
            }))
        }
    }

    struct NullAuditLog;

    #[async_trait]
    impl AuditLog for NullAuditLog {
        async fn log_event(&self, _actor: &str, _event_kind: &str, _metadata: Value) {}
    }

    /// Evaluator whose cycle count is observable through oracle calls.
    fn counting_evaluator() -> (Arc<AlertEvaluator>, Arc<CountingOracle>) {
        let store = Arc::new(MemoryAlertStore::new());
        store.insert(crate::model::Alert {
            id: uuid::Uuid::new_v4(),
            owner_id: "user-1".to_string(),
            symbol: "BTCUSDT".to_string(),
            condition: crate::model::AlertCondition::Above,
            threshold: 1_000_000.0, // never fires
            active: true,
            expires_at: None,
            last_triggered_at: None,
            last_triggered_price: None,
            created_at: Utc::now(),
        });
        let oracle = Arc::new(CountingOracle {
            calls: AtomicU32::new(0),
        });
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Vec::new(),
            Arc::new(NullAuditLog),
            Arc::new(DispatchMetrics::new()),
        ));
        (
            Arc::new(AlertEvaluator::new(store, oracle.clone(), dispatcher)),
            oracle,
        )
    }

    #[derive(Default)]
    struct TestState {
        zsets: HashMap<String, BTreeMap<String, i64>>,
        strings: HashMap<String, String>,
    }

    #[derive(Clone, Default)]
    struct TestSchedulerStore {
        state: Arc<SyncMutex<TestState>>,
        fail_all: bool,
    }

    #[async_trait]
    impl SchedulerStore for TestSchedulerStore {
        async fn zadd_nx(&self, key: &str, member: &str, score: i64) -> Result<()> {
            if self.fail_all {
                return Err(EngineError::SchedulerUnavailable("down".to_string()));
            }
            let mut guard = self.state.lock();
            guard
                .zsets
                .entry(key.to_string())
                .or_default()
                .entry(member.to_string())
                .or_insert(score);
            Ok(())
        }

        async fn zadd_xx(&self, key: &str, member: &str, score: i64) -> Result<()> {
            let mut guard = self.state.lock();
            if let Some(z) = guard.zsets.get_mut(key) {
                if z.contains_key(member) {
                    z.insert(member.to_string(), score);
                }
            }
            Ok(())
        }

        async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
            let guard = self.state.lock();
            Ok(guard.zsets.get(key).and_then(|z| z.get(member).copied()))
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<()> {
            let mut guard = self.state.lock();
            if let Some(z) = guard.zsets.get_mut(key) {
                z.remove(member);
            }
            Ok(())
        }

        async fn zrangebyscore_withscores(
            &self,
            key: &str,
            max_score: i64,
            limit: usize,
        ) -> Result<Vec<(String, i64)>> {
            let guard = self.state.lock();
            let mut items: Vec<(String, i64)> = guard
                .zsets
                .get(key)
                .into_iter()
                .flat_map(|z| z.iter())
                .filter(|(_member, score)| **score <= max_score)
                .map(|(member, score)| (member.clone(), *score))
                .collect();
            items.sort_by_key(|(member, score)| (*score, member.clone()));
            items.truncate(limit);
            Ok(items)
        }

        async fn set_nx_ex(&self, key: &str, value: &str, _ttl_secs: usize) -> Result<bool> {
            let mut guard = self.state.lock();
            if guard.strings.contains_key(key) {
                return Ok(false);
            }
            guard.strings.insert(key.to_string(), value.to_string());
            Ok(true)
        }

        async fn del(&self, key: &str) -> Result<()> {
            self.state.lock().strings.remove(key);
            Ok(())
        }
    }

    fn durable_core(
        evaluator: Arc<AlertEvaluator>,
        store: TestSchedulerStore,
    ) -> SchedulerCore {
        SchedulerCore::with_timing(
            evaluator,
            Some(Arc::new(store)),
            Duration::from_millis(500),
            Duration::from_millis(20),
            60,
        )
    }

    #[tokio::test]
    async fn double_start_keeps_exactly_one_loop() {
        let (evaluator, oracle) = counting_evaluator();
        let core = SchedulerCore::with_timing(
            evaluator,
            None,
            Duration::from_millis(50),
            Duration::from_millis(10),
            60,
        );

        core.start().await.unwrap();
        core.start().await.unwrap();
        assert_eq!(core.state().await, SchedulerState::Running);
        assert_eq!(core.mode().await, Some(SchedulerMode::Fallback));

        tokio::time::sleep(Duration::from_millis(130)).await;
        core.stop().await;

        // Two intervals elapsed; a duplicated loop would have doubled this.
        let calls = oracle.calls.load(Ordering::SeqCst);
        assert!((2..=3).contains(&calls), "expected 2-3 cycles, got {}", calls);
    }

    #[tokio::test]
    async fn fallback_stop_cancels_pending_sleep_promptly() {
        let (evaluator, oracle) = counting_evaluator();
        let core = SchedulerCore::with_timing(
            evaluator,
            None,
            Duration::from_secs(3600),
            Duration::from_millis(10),
            60,
        );
        core.start().await.unwrap();

        let started = std::time::Instant::now();
        core.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(core.state().await, SchedulerState::Stopped);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn durable_mode_registers_job_idempotently() {
        let (evaluator, _oracle) = counting_evaluator();
        let store = TestSchedulerStore::default();
        let core = durable_core(evaluator, store.clone());

        core.start().await.unwrap();
        assert_eq!(core.mode().await, Some(SchedulerMode::Durable));
        let first = store.zscore(SCHEDULE_ZSET, EVALUATION_JOB_ID).await.unwrap();
        assert!(first.is_some());

        // A second start is a no-op; the single job entry remains.
        core.start().await.unwrap();
        let members = store
            .zrangebyscore_withscores(SCHEDULE_ZSET, i64::MAX, 10)
            .await
            .unwrap();
        assert_eq!(members.len(), 1);

        core.stop().await;
        // Stop deregisters the job.
        let after = store.zscore(SCHEDULE_ZSET, EVALUATION_JOB_ID).await.unwrap();
        assert!(after.is_none());
    }

    #[tokio::test]
    async fn missed_runs_coalesce_into_one_catch_up() {
        let (evaluator, oracle) = counting_evaluator();
        let store = TestSchedulerStore::default();
        // Seed a job that is many intervals overdue.
        store
            .zadd_nx(
                SCHEDULE_ZSET,
                EVALUATION_JOB_ID,
                Utc::now().timestamp_millis() - 100_000,
            )
            .await
            .unwrap();

        let core = durable_core(evaluator, store.clone());
        core.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        core.stop().await;

        // One catch-up execution, not one per missed interval.
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn held_lease_caps_concurrent_executions() {
        let (evaluator, oracle) = counting_evaluator();
        let store = TestSchedulerStore::default();
        store
            .zadd_nx(
                SCHEDULE_ZSET,
                EVALUATION_JOB_ID,
                Utc::now().timestamp_millis() - 10_000,
            )
            .await
            .unwrap();
        // Another instance already holds the run lease.
        store
            .set_nx_ex(
                &format!("{}{}", RUN_LEASE_PREFIX, EVALUATION_JOB_ID),
                "other-instance",
                60,
            )
            .await
            .unwrap();

        let core = durable_core(evaluator, store.clone());
        core.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        core.stop().await;

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unreachable_backend_degrades_to_fallback() {
        let (evaluator, _oracle) = counting_evaluator();
        let store = TestSchedulerStore {
            fail_all: true,
            ..Default::default()
        };
        let core = durable_core(evaluator, store);

        core.start().await.unwrap();
        assert_eq!(core.mode().await, Some(SchedulerMode::Fallback));
        assert_eq!(core.state().await, SchedulerState::Running);
        core.stop().await;
    }

    #[tokio::test]
    async fn durable_loop_runs_and_advances_schedule() {
        let (evaluator, oracle) = counting_evaluator();
        let store = TestSchedulerStore::default();
        store
            .zadd_nx(
                SCHEDULE_ZSET,
                EVALUATION_JOB_ID,
                Utc::now().timestamp_millis() - 1000,
            )
            .await
            .unwrap();

        let core = durable_core(evaluator, store.clone());
        core.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        let next = store
            .zscore(SCHEDULE_ZSET, EVALUATION_JOB_ID)
            .await
            .unwrap()
            .unwrap();
        assert!(next > Utc::now().timestamp_millis());
        // Lease released after the run.
        assert!(core
            .store
            .as_ref()
            .unwrap()
            .set_nx_ex(
                &format!("{}{}", RUN_LEASE_PREFIX, EVALUATION_JOB_ID),
                "probe",
                1,
            )
            .await
            .unwrap());
        core.stop().await;
    }
}
