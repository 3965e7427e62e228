//! Market alert evaluation and notification fan-out engine
//!
//! A scheduler drives periodic evaluation of user-defined price alerts
//! against a live ticker feed; triggered alerts fan out to realtime
//! websocket subscribers, a push gateway, Telegram chats, and an audit
//! trail, with per-channel failure isolation and dispatch metrics.

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod oracle;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod store;

pub use config::EngineConfig;
pub use dispatcher::{DispatchReport, NotificationDispatcher};
pub use error::EngineError;
pub use evaluator::{AlertEvaluator, CycleSummary};
pub use model::{Alert, AlertCondition, PriceSnapshot};
pub use oracle::{HttpTickerOracle, PriceOracle};
pub use registry::{BroadcastOutcome, ConnectionHandle, ConnectionRegistry};
pub use scheduler::{SchedulerCore, SchedulerMode, SchedulerState};
pub use store::{AlertStore, MemoryAlertStore, RedisAlertStore};

// Re-export Result type for convenience
pub type Result<T> = std::result::Result<T, EngineError>;
