//! Events the session core emits for the hub to broadcast.
//!
//! Kept as a plain enum + sink trait so this crate has no dependency on
//! the WebSocket transport; `attn-bridge` implements [`EventSink`] over
//! its hub's broadcast channel.

use attn_core::types::Session;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionRegistered { session: Session },
    SessionStateChanged { session: Session },
    SessionTodosUpdated { session: Session },
    SessionUnregistered { id: String },
    SessionExited { id: String, exit_code: Option<i32>, signal: Option<i32> },
    SessionsUpdated,
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: SessionEvent);
}

/// No-op sink for tests and for contexts with no connected clients yet.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SessionEvent) {}
}
