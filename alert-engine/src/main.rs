//! Alert engine binary
//!
//! Composition root: builds the store, oracle, connection registry, channel
//! adapters, dispatcher, evaluator, and scheduler from environment
//! configuration, then runs until interrupted. A missing or unreachable
//! Redis degrades the process (in-memory store, tracing audit trail,
//! in-process scheduler loop) instead of failing startup.

use alert_engine::channels::{
    AuditChannel, AuditLog, ChannelAdapter, PushChannel, RealtimeChannel, RedisAuditLog,
    TelegramChannel, TelegramClient, TracingAuditLog,
};
use alert_engine::server::{run_realtime_listener, RealtimeServerConfig};
use alert_engine::{
    AlertEvaluator, ConnectionRegistry, EngineConfig, HttpTickerOracle, MemoryAlertStore,
    NotificationDispatcher, RedisAlertStore, SchedulerCore,
};
use anyhow::{Context, Result};
use notify_common::{DispatchMetrics, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("alert_engine=info".parse()?),
        )
        .init();

    info!("starting alert engine");

    let config = EngineConfig::from_env().context("failed to load configuration")?;

    let redis = match &config.redis_url {
        Some(url) => match connect_redis(url).await {
            Ok(conn) => {
                info!("connected to redis");
                Some(conn)
            }
            Err(e) => {
                warn!(error = %e, "redis unreachable, running degraded without a durable backend");
                None
            }
        },
        None => {
            info!("no redis configured, running without a durable backend");
            None
        }
    };

    let store: Arc<dyn alert_engine::AlertStore> = match redis.clone() {
        Some(conn) => Arc::new(RedisAlertStore::new(conn)),
        None => Arc::new(MemoryAlertStore::new()),
    };
    let audit: Arc<dyn AuditLog> = match redis.clone() {
        Some(conn) => Arc::new(RedisAuditLog::new(
            conn,
            config.audit_stream_key.clone(),
            config.audit_stream_maxlen,
        )),
        None => Arc::new(TracingAuditLog::new()),
    };

    let oracle = Arc::new(
        HttpTickerOracle::new(
            config.oracle_base_url.clone(),
            Duration::from_millis(config.oracle_timeout_ms),
            config.oracle_source.clone(),
        )
        .context("failed to build price oracle client")?,
    );

    let registry = Arc::new(ConnectionRegistry::new());
    let metrics = Arc::new(DispatchMetrics::new());
    let channel_retry = RetryConfig::new(config.channel_retry_attempts, 500, 5000);

    // Fan-out order: realtime first, then push, then bot, then audit.
    let mut adapters: Vec<Arc<dyn ChannelAdapter>> =
        vec![Arc::new(RealtimeChannel::new(registry.clone()))];
    if let Some(endpoint) = &config.push_endpoint {
        let push = PushChannel::new(
            endpoint.clone(),
            config.push_api_key.clone(),
            Duration::from_millis(config.push_timeout_ms),
            channel_retry.clone(),
        )
        .context("failed to build push channel")?;
        adapters.push(Arc::new(push));
        info!("push channel enabled");
    }
    if let Some(bot_token) = &config.telegram_bot_token {
        let chats = config.telegram_chats();
        if chats.is_empty() {
            warn!("telegram bot token set but no chat ids configured, bot channel disabled");
        } else {
            let client = TelegramClient::new(Duration::from_secs(10))
                .context("failed to build telegram client")?;
            adapters.push(Arc::new(TelegramChannel::new(
                client,
                bot_token.clone(),
                chats,
                channel_retry.clone(),
            )));
            info!("telegram channel enabled");
        }
    }
    adapters.push(Arc::new(AuditChannel::new(audit.clone())));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        adapters,
        audit.clone(),
        metrics.clone(),
    ));
    let evaluator = Arc::new(AlertEvaluator::new(store, oracle, dispatcher));

    let scheduler_store = redis
        .clone()
        .map(|conn| {
            Arc::new(alert_engine::scheduler::RedisSchedulerStore::new(conn))
                as Arc<dyn alert_engine::scheduler::SchedulerStore>
        });
    let scheduler = SchedulerCore::new(&config, evaluator, scheduler_store);
    scheduler.start().await.context("failed to start scheduler")?;

    let (ws_shutdown_tx, ws_shutdown_rx) = watch::channel(false);
    let ws_task = tokio::spawn(run_realtime_listener(
        RealtimeServerConfig {
            bind_addr: config.websocket_bind_addr.clone(),
            heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
            connection_timeout: Duration::from_secs(config.connection_timeout_secs),
        },
        registry.clone(),
        ws_shutdown_rx,
    ));

    info!("alert engine ready");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    scheduler.stop().await;
    let _ = ws_shutdown_tx.send(true);
    let _ = ws_task.await;

    info!(snapshot = ?metrics.snapshot(), "alert engine shutdown complete");
    Ok(())
}

async fn connect_redis(url: &str) -> Result<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url).context("invalid redis url")?;
    let conn = redis::aio::ConnectionManager::new(client)
        .await
        .context("failed to connect to redis")?;
    Ok(conn)
}
