use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainResult {
    Complete(usize),
    Timeout { confirmed: usize, expected: usize },
}

impl DrainResult {
    pub fn is_complete(&self) -> bool {
        matches!(self, DrainResult::Complete(_))
    }
}

/// Cooperative shutdown coordinator. A single `trigger()` fans out to every
/// subscriber via a broadcast channel; each subscriber confirms it has
/// drained in-flight work via `confirm_drained()`, and the trigger side
/// can `wait_for_drain` with a timeout before forcing a shutdown.
#[derive(Clone)]
pub struct ShutdownSignal {
    trigger: broadcast::Sender<()>,
    shutting_down: Arc<AtomicBool>,
    drain_tx: Arc<watch::Sender<usize>>,
    drain_rx: watch::Receiver<usize>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (trigger, _) = broadcast::channel(16);
        let (drain_tx, drain_rx) = watch::channel(0);
        Self {
            trigger,
            shutting_down: Arc::new(AtomicBool::new(false)),
            drain_tx: Arc::new(drain_tx),
            drain_rx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.trigger.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Idempotent: the second and later calls are no-ops.
    pub fn trigger(&self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let _ = self.trigger.send(());
        }
    }

    /// Called by a subscriber once it has finished draining in-flight
    /// work in response to a trigger.
    pub fn confirm_drained(&self) {
        self.drain_tx.send_modify(|count| *count += 1);
    }

    pub async fn wait_for_drain(&self, expected: usize, timeout: Duration) -> DrainResult {
        let mut rx = self.drain_rx.clone();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if *rx.borrow() >= expected {
                return DrainResult::Complete(*rx.borrow());
            }
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return DrainResult::Timeout { confirmed: *rx.borrow(), expected };
            }
            if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
                return DrainResult::Timeout { confirmed: *rx.borrow(), expected };
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.trigger.receiver_count()
    }

    /// An RAII guard that confirms drain on drop, for subscribers whose
    /// control flow has multiple early-return paths.
    pub fn guard(&self) -> ShutdownGuard {
        ShutdownGuard { signal: self.clone() }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ShutdownGuard {
    signal: ShutdownSignal,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.signal.confirm_drained();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_idempotent() {
        let signal = ShutdownSignal::new();
        let mut rx = signal.subscribe();
        signal.trigger();
        signal.trigger();
        rx.recv().await.unwrap();
        assert!(signal.is_shutting_down());
    }

    #[tokio::test]
    async fn subscriber_count_tracks_subscriptions() {
        let signal = ShutdownSignal::new();
        assert_eq!(signal.subscriber_count(), 0);
        let _a = signal.subscribe();
        let _b = signal.subscribe();
        assert_eq!(signal.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn drain_completes_when_all_confirm() {
        let signal = ShutdownSignal::new();
        signal.confirm_drained();
        signal.confirm_drained();
        let result = signal.wait_for_drain(2, Duration::from_millis(100)).await;
        assert_eq!(result, DrainResult::Complete(2));
    }

    #[tokio::test]
    async fn drain_times_out_when_not_all_confirm() {
        let signal = ShutdownSignal::new();
        signal.confirm_drained();
        let result = signal.wait_for_drain(2, Duration::from_millis(30)).await;
        assert_eq!(result, DrainResult::Timeout { confirmed: 1, expected: 2 });
    }

    #[tokio::test]
    async fn guard_confirms_drain_on_drop() {
        let signal = ShutdownSignal::new();
        {
            let _guard = signal.guard();
        }
        let result = signal.wait_for_drain(1, Duration::from_millis(100)).await;
        assert!(result.is_complete());
    }
}
