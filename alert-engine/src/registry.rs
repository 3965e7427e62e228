//! Connection registry for realtime subscribers
//!
//! Thread-safe set of live websocket subscribers. All mutations happen under
//! a single lock scoped strictly to the map itself; `broadcast` snapshots
//! the handles and delivers outside the lock, so a slow or dead subscriber
//! never stalls registration or unregistration of others. Handles whose
//! delivery fails are pruned from the set (broadcast-then-prune).

use notify_common::ServerMessage;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

/// Opaque identity for one realtime subscriber: an id plus the bounded
/// outbound queue owned by the subscriber's connection task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: Uuid,
    sender: mpsc::Sender<ServerMessage>,
}

impl ConnectionHandle {
    pub fn new(id: Uuid, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self { id, sender }
    }

    /// Queue a message for this subscriber. A closed or full queue counts as
    /// a delivery failure.
    fn deliver(&self, message: ServerMessage) -> bool {
        self.sender.try_send(message).is_ok()
    }
}

/// Best-effort result of one broadcast call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub pruned: usize,
}

/// Registry of live realtime subscriber handles.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<Uuid, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handle to the active set; idempotent if already present.
    pub fn register(&self, handle: ConnectionHandle) {
        let id = handle.id;
        self.connections.lock().insert(id, handle);
        debug!(connection_id = %id, "registered realtime subscriber");
    }

    /// Remove a handle; idempotent if absent.
    pub fn unregister(&self, id: &Uuid) {
        if self.connections.lock().remove(id).is_some() {
            debug!(connection_id = %id, "unregistered realtime subscriber");
        }
    }

    /// Current registered size.
    pub fn count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Deliver `message` to every registered subscriber.
    ///
    /// Takes an atomic snapshot of the handle set, delivers outside the
    /// lock, then removes every handle whose delivery failed. Never fails;
    /// returns delivered/pruned counts.
    pub fn broadcast(&self, message: &ServerMessage) -> BroadcastOutcome {
        let snapshot: Vec<ConnectionHandle> =
            self.connections.lock().values().cloned().collect();
        if snapshot.is_empty() {
            return BroadcastOutcome::default();
        }

        let mut outcome = BroadcastOutcome::default();
        let mut failed = Vec::new();
        for handle in &snapshot {
            if handle.deliver(message.clone()) {
                outcome.delivered += 1;
            } else {
                failed.push(handle.id);
            }
        }

        if !failed.is_empty() {
            let mut connections = self.connections.lock();
            for id in failed {
                if connections.remove(&id).is_some() {
                    outcome.pruned += 1;
                }
            }
            info!(
                delivered = outcome.delivered,
                pruned = outcome.pruned,
                "pruned dead realtime subscribers during broadcast"
            );
        }

        outcome
    }
}
