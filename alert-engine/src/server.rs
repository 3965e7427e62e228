//! Realtime websocket transport
//!
//! Accepts subscriber connections and wires their lifecycle to the
//! connection registry: a peer is registered once its socket is accepted and
//! unregistered when the socket closes, errors, or misses its pong deadline.
//! Outbound notifications flow through the registry's per-connection queue;
//! this task drains that queue onto the socket.

use crate::error::{EngineError, Result};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use futures_util::{SinkExt, StreamExt};
use notify_common::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outbound queue depth per subscriber. A peer that falls this far behind is
/// treated as dead by the registry's broadcast pruning.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

pub struct RealtimeServerConfig {
    pub bind_addr: String,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
}

/// Run the websocket accept loop until the shutdown signal fires.
pub async fn run_realtime_listener(
    config: RealtimeServerConfig,
    registry: Arc<ConnectionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .map_err(|e| EngineError::Configuration(format!("invalid websocket bind address: {}", e)))?;
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| EngineError::Configuration(format!("failed to bind {}: {}", addr, e)))?;
    info!("realtime listener on {}", addr);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("realtime listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let registry = registry.clone();
                        let heartbeat = config.heartbeat_interval;
                        let timeout = config.connection_timeout;
                        tokio::spawn(async move {
                            handle_connection(stream, peer_addr, registry, heartbeat, timeout).await;
                        });
                    }
                    Err(e) => {
                        error!("websocket accept error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Handle a single subscriber connection
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    heartbeat: Duration,
    timeout: Duration,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("websocket handshake failed for {}: {}", peer_addr, e);
            return;
        }
    };

    let connection_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_DEPTH);
    registry.register(ConnectionHandle::new(connection_id, tx.clone()));
    info!(connection_id = %connection_id, peer = %peer_addr, "realtime subscriber connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    // First heartbeat fires after one full interval, not immediately.
    let mut heartbeat_interval =
        tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);
    let mut last_pong = std::time::Instant::now();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Ok(ClientMessage::Ping) = serde_json::from_str::<ClientMessage>(&text) {
                            let _ = tx.send(ServerMessage::Pong { timestamp: chrono::Utc::now() }).await;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = std::time::Instant::now();
                        debug!(connection_id = %connection_id, "pong received");
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(connection_id = %connection_id, "connection closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = %connection_id, error = %e, "websocket error");
                        break;
                    }
                    _ => {}
                }
            }

            outbound = rx.recv() => {
                let Some(message) = outbound else { break };
                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(connection_id = %connection_id, error = %e, "unserializable outbound message");
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    warn!(connection_id = %connection_id, error = %e, "send failed");
                    break;
                }
            }

            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > timeout {
                    warn!(connection_id = %connection_id, "pong deadline missed, dropping peer");
                    break;
                }
                if ws_sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    registry.unregister(&connection_id);
    info!(connection_id = %connection_id, "realtime subscriber disconnected");
}
