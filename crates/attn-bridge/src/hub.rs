//! Client fan-out. Grounded on the teacher's `EventBus`
//! (`at-bridge::event_bus::EventBus`), generalized from an unbounded
//! `Vec<Sender>` to a bounded per-client channel with a slow-consumer
//! eviction policy, since a wedged WebSocket write must not be allowed
//! to back up memory for every other client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use attn_core::types::Session;
use attn_session::events::{EventSink, SessionEvent};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::protocol::BridgeEvent;

/// Outbound messages are dropped rather than blocking a publisher if a
/// client's buffer is full; three consecutive drops evict the client.
const OUTBOUND_BUFFER: usize = 256;
const EVICTION_STRIKES: u32 = 3;

struct Client {
    tx: flume::Sender<Arc<BridgeEvent>>,
    strikes: AtomicU32,
}

/// Broadcasts [`BridgeEvent`]s to every connected client, and tracks
/// the startup recovery barrier that gates `initial_state` delivery
/// and PTY-mutating command acceptance.
pub struct Hub {
    clients: Mutex<HashMap<u64, Client>>,
    next_id: AtomicU64,
    recovering: AtomicBool,
    pending_initial: Mutex<Vec<u64>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            recovering: AtomicBool::new(false),
            pending_initial: Mutex::new(Vec::new()),
        }
    }

    /// Begin the startup recovery barrier: new clients are queued for
    /// `initial_state` instead of receiving it immediately, and
    /// PTY-mutating commands are rejected.
    pub fn begin_recovery(&self) {
        self.recovering.store(true, Ordering::SeqCst);
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Lift the barrier and return the client ids that connected while
    /// it was up, in connection order, so the caller can send each its
    /// `initial_state` snapshot exactly once.
    pub fn end_recovery(&self) -> Vec<u64> {
        self.recovering.store(false, Ordering::SeqCst);
        std::mem::take(&mut *self.pending_initial.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Register a new client connection. Returns its id and receiving
    /// end. If the barrier is up, the id is queued and the caller must
    /// not send `initial_state` until [`Self::end_recovery`] reports it.
    pub fn register(&self) -> (u64, flume::Receiver<Arc<BridgeEvent>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = flume::bounded(OUTBOUND_BUFFER);
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).insert(id, Client { tx, strikes: AtomicU32::new(0) });
        if self.is_recovering() {
            self.pending_initial.lock().unwrap_or_else(|e| e.into_inner()).push(id);
        }
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).remove(&id);
    }

    pub fn client_count(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Send a message to one client only (used for `initial_state`).
    pub fn send_to(&self, id: u64, event: BridgeEvent) {
        let event = Arc::new(event);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&id) {
            if client.tx.try_send(event).is_err() {
                warn!(client_id = id, "dropped initial_state: client buffer full");
            }
        }
    }

    /// Broadcast to every connected client, evicting any client whose
    /// buffer has been full for three consecutive broadcasts.
    pub fn broadcast(&self, event: BridgeEvent) {
        let event = Arc::new(event);
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let mut evicted = Vec::new();
        for (id, client) in clients.iter() {
            match client.tx.try_send(event.clone()) {
                Ok(()) => {
                    client.strikes.store(0, Ordering::SeqCst);
                }
                Err(_) => {
                    let strikes = client.strikes.fetch_add(1, Ordering::SeqCst) + 1;
                    if strikes >= EVICTION_STRIKES {
                        evicted.push(*id);
                    }
                }
            }
        }
        for id in evicted {
            clients.remove(&id);
            warn!(client_id = id, "evicted slow websocket consumer after repeated buffer overflow");
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts the session core's narrow [`EventSink`] port onto the hub's
/// broadcast.
pub struct HubEventSink(pub Arc<Hub>);

impl EventSink for HubEventSink {
    fn emit(&self, event: SessionEvent) {
        let bridge_event = match event {
            SessionEvent::SessionRegistered { session } => BridgeEvent::SessionRegistered { session },
            SessionEvent::SessionStateChanged { session } => BridgeEvent::SessionStateChanged { session },
            SessionEvent::SessionTodosUpdated { session } => BridgeEvent::SessionTodosUpdated { session },
            SessionEvent::SessionUnregistered { id } => BridgeEvent::SessionUnregistered { id },
            SessionEvent::SessionExited { id, exit_code, signal } => BridgeEvent::SessionExited { id, exit_code, signal },
            SessionEvent::SessionsUpdated => BridgeEvent::SessionsUpdated,
        };
        self.0.broadcast(bridge_event);
    }
}

/// Adapts the PR scheduler's narrow [`attn_github::events::PrEventSink`]
/// port onto the hub's broadcast.
pub struct HubPrSink(pub Arc<Hub>);

impl attn_github::events::PrEventSink for HubPrSink {
    fn prs_updated(&self) {
        self.0.broadcast(BridgeEvent::PrsUpdated);
    }

    fn rate_limited(&self, resource: &str, reset_at: DateTime<Utc>) {
        info!(resource, %reset_at, "github rate limit hit, surfacing to clients");
        self.0.broadcast(BridgeEvent::RateLimited { resource: resource.to_string(), reset_at });
    }
}

/// Snapshot helper used by both the WebSocket connect path and the
/// deferred recovery flush.
pub async fn build_initial_state(
    store: &attn_core::Store,
    core: &attn_session::SessionCore,
    daemon_instance_id: &str,
) -> Result<BridgeEvent, attn_core::StoreError> {
    let sessions: Vec<Session> = core.list().await.unwrap_or_default();
    let prs = store.list_prs().await?;
    let repos = store.list_repo_states().await?;
    let authors = store.list_author_states().await?;
    let warnings = store.list_warnings().await?;
    Ok(BridgeEvent::InitialState {
        sessions,
        prs,
        repos,
        authors,
        warnings,
        daemon_instance_id: daemon_instance_id.to_string(),
    })
}
