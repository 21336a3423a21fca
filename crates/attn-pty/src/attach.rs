//! Multi-subscriber output fan-out for a single PTY.
//!
//! The teacher's pool hands each caller the raw `reader` half of the
//! PTY, which only works for one consumer at a time. A daemon needs to
//! let several websocket clients watch (and detach from) the same
//! session concurrently, so output here is pushed into a sequenced
//! ring buffer and broadcast to every attached subscriber; a late
//! subscriber replays the buffer's backlog before following live.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::warn;

/// One chunk of output, or a terminal marker, delivered to subscribers.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Output { seq: u64, data: Vec<u8> },
    /// Emitted to a subscriber whose requested replay point has already
    /// fallen out of the scrollback window; it must discard local state
    /// and resynchronize from the snapshot it was just sent.
    Desync,
    Exit { code: Option<i32>, signal: Option<i32> },
}

const DEFAULT_SCROLLBACK: usize = 8192;

struct Inner {
    next_seq: u64,
    /// Ring buffer of the most recent chunks, oldest first.
    scrollback: VecDeque<(u64, Vec<u8>)>,
    scrollback_bytes: usize,
    max_bytes: usize,
    subscribers: Vec<Subscriber>,
    exited: Option<(Option<i32>, Option<i32>)>,
    last_activity: Option<DateTime<Utc>>,
}

struct Subscriber {
    id: u64,
    tx: flume::Sender<PtyEvent>,
}

/// Sequenced, multi-subscriber output buffer for one PTY session.
pub struct OutputBuffer {
    inner: Mutex<Inner>,
    next_subscriber_id: std::sync::atomic::AtomicU64,
}

/// A live attachment returned to a caller. Dropping it unsubscribes.
pub struct AttachInfo {
    pub session_id: String,
    pub rx: flume::Receiver<PtyEvent>,
    pub replayed_from: u64,
    pub last_seq: u64,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::with_scrollback(DEFAULT_SCROLLBACK)
    }

    pub fn with_scrollback(max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_seq: 0,
                scrollback: VecDeque::new(),
                scrollback_bytes: 0,
                max_bytes,
                subscribers: Vec::new(),
                exited: None,
                last_activity: None,
            }),
            next_subscriber_id: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| {
            warn!("pty output buffer lock poisoned, recovering");
            e.into_inner()
        })
    }

    /// Called from the PTY reader thread for each chunk read.
    pub fn push(&self, data: &[u8]) {
        let mut inner = self.lock();
        inner.last_activity = Some(Utc::now());
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.scrollback_bytes += data.len();
        inner.scrollback.push_back((seq, data.to_vec()));
        while inner.scrollback_bytes > inner.max_bytes {
            if let Some((_, old)) = inner.scrollback.pop_front() {
                inner.scrollback_bytes -= old.len();
            } else {
                break;
            }
        }
        let event = PtyEvent::Output { seq, data: data.to_vec() };
        inner.subscribers.retain(|s| s.tx.send(event.clone()).is_ok());
    }

    pub fn push_exit(&self, code: Option<i32>, signal: Option<i32>) {
        let mut inner = self.lock();
        inner.exited = Some((code, signal));
        let event = PtyEvent::Exit { code, signal };
        for s in &inner.subscribers {
            let _ = s.tx.send(event.clone());
        }
        inner.subscribers.clear();
    }

    /// Attach a new subscriber. `since_seq` of `None` replays the full
    /// scrollback; `Some(n)` replays only chunks after `n`, or emits a
    /// [`PtyEvent::Desync`] first if `n` has already aged out.
    pub fn attach(&self, session_id: impl Into<String>, since_seq: Option<u64>) -> AttachInfo {
        let (tx, rx) = flume::bounded(1024);
        let mut inner = self.lock();

        let oldest_seq = inner.scrollback.front().map(|(s, _)| *s);
        let mut replayed_from = since_seq.unwrap_or(0);

        if let Some(requested) = since_seq {
            if let Some(oldest) = oldest_seq {
                if requested < oldest {
                    let _ = tx.send(PtyEvent::Desync);
                    replayed_from = oldest;
                }
            }
        } else {
            replayed_from = oldest_seq.unwrap_or(inner.next_seq);
        }

        for (seq, data) in inner.scrollback.iter() {
            if *seq >= replayed_from {
                let _ = tx.send(PtyEvent::Output { seq: *seq, data: data.clone() });
            }
        }

        if let Some((code, signal)) = inner.exited {
            let _ = tx.send(PtyEvent::Exit { code, signal });
        }

        let id = self.next_subscriber_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        inner.subscribers.push(Subscriber { id, tx: tx.clone() });

        AttachInfo {
            session_id: session_id.into(),
            rx,
            replayed_from,
            last_seq: inner.next_seq.saturating_sub(1),
        }
    }

    /// Close every current subscriber without terminating the PTY
    /// itself. Used when a new primary attachment should orphan any
    /// stale viewers left over from a prior process (e.g. after crash
    /// recovery re-attaches a session whose old websocket never closed).
    pub fn close_all_subscribers(&self) {
        let mut inner = self.lock();
        inner.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Timestamp of the last byte pushed, or `None` if nothing has been
    /// written yet. Used by the transcript watcher's quiet-window gate.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.lock().last_activity
    }
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replays_full_scrollback_on_fresh_attach() {
        let buf = OutputBuffer::new();
        buf.push(b"hello ");
        buf.push(b"world");
        let info = buf.attach("s1", None);
        let mut collected = Vec::new();
        while let Ok(PtyEvent::Output { data, .. }) = info.rx.try_recv() {
            collected.extend(data);
        }
        assert_eq!(collected, b"hello world");
    }

    #[test]
    fn replays_only_after_requested_seq() {
        let buf = OutputBuffer::new();
        buf.push(b"a");
        buf.push(b"b");
        buf.push(b"c");
        let info = buf.attach("s1", Some(1));
        let mut collected = Vec::new();
        while let Ok(PtyEvent::Output { data, .. }) = info.rx.try_recv() {
            collected.extend(data);
        }
        assert_eq!(collected, b"bc");
    }

    #[test]
    fn desync_emitted_when_requested_seq_aged_out() {
        let buf = OutputBuffer::with_scrollback(2);
        buf.push(b"aa");
        buf.push(b"bb");
        buf.push(b"cc");
        let info = buf.attach("s1", Some(0));
        assert!(matches!(info.rx.try_recv(), Ok(PtyEvent::Desync)));
    }

    #[test]
    fn live_push_reaches_attached_subscriber() {
        let buf = OutputBuffer::new();
        let info = buf.attach("s1", None);
        buf.push(b"live");
        let event = info.rx.try_recv().unwrap();
        assert!(matches!(event, PtyEvent::Output { data, .. } if data == b"live"));
    }

    #[test]
    fn exit_event_delivered_and_subscribers_cleared() {
        let buf = OutputBuffer::new();
        let info = buf.attach("s1", None);
        buf.push_exit(Some(0), None);
        assert!(matches!(info.rx.try_recv(), Ok(PtyEvent::Exit { code: Some(0), .. })));
        assert_eq!(buf.subscriber_count(), 0);
    }

    #[test]
    fn close_all_subscribers_orphans_without_exit() {
        let buf = OutputBuffer::new();
        let _info = buf.attach("s1", None);
        assert_eq!(buf.subscriber_count(), 1);
        buf.close_all_subscribers();
        assert_eq!(buf.subscriber_count(), 0);
    }
}
