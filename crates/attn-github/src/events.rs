use chrono::{DateTime, Utc};

/// Narrow outbound port, mirroring `attn_session::EventSink` — this
/// crate has no business depending on the WebSocket hub, so it emits
/// through this trait and the composition root wires a real sink in.
pub trait PrEventSink: Send + Sync {
    fn prs_updated(&self);
    fn rate_limited(&self, resource: &str, reset_at: DateTime<Utc>);
}

pub struct NullSink;

impl PrEventSink for NullSink {
    fn prs_updated(&self) {}
    fn rate_limited(&self, _resource: &str, _reset_at: DateTime<Utc>) {}
}
