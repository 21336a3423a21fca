//! Startup PTY recovery and the deferred reconciler.
//!
//! Grounded on `at-agents::supervisor::AgentSupervisor::restart_failed`
//! for the shape of a sweep over managed entities correcting state in
//! bulk; the store/live-PTY reconciliation table itself is new, built
//! to the exit-code table in §4.2.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use attn_core::types::SessionState;
use attn_core::Store;
use attn_pty::PtyBackend;
use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Default, Clone)]
pub struct RecoveryOutcome {
    pub recovered: Vec<String>,
    pub removed: Vec<String>,
    pub idled: Vec<String>,
    pub deferred: Vec<String>,
    pub unclaimed_live: Vec<String>,
}

/// Reconcile the store's session table against the live PTY set once,
/// per the table in §4.2. Returns the sessions left in the "defer"
/// class so the caller can schedule [`spawn_deferred_reconciler`].
pub async fn reconcile_startup(store: &Store, backend: &dyn PtyBackend, cutoff: DateTime<Utc>) -> Result<RecoveryOutcome> {
    let store_sessions = store.list_sessions().await?;
    let known_ids: Vec<String> = store_sessions.iter().map(|s| s.id.clone()).collect();
    let report = backend.recover(&known_ids).await?;
    let idle_demotion_allowed = report.failed.is_empty();

    let live_ids: HashSet<String> = backend.session_ids().await?.into_iter().collect();
    let store_ids: HashSet<String> = known_ids.iter().cloned().collect();

    let mut outcome = RecoveryOutcome::default();

    for session in &store_sessions {
        if live_ids.contains(&session.id) {
            store.update_last_seen(&session.id, Utc::now()).await?;
            outcome.recovered.push(session.id.clone());
            continue;
        }

        if !session.agent.is_recoverable_kind() {
            store.remove_session(&session.id).await?;
            outcome.removed.push(session.id.clone());
            continue;
        }

        let probe_dead = !backend.is_alive(&session.id).await.unwrap_or(false);
        let allowed = idle_demotion_allowed || (session.state_updated_at <= cutoff && probe_dead);

        if allowed {
            idle_demote(store, &session.id).await?;
            outcome.idled.push(session.id.clone());
        } else {
            outcome.deferred.push(session.id.clone());
        }
    }

    for live_id in &live_ids {
        if !store_ids.contains(live_id) {
            // The backend doesn't expose enough metadata (agent kind,
            // label, working dir) to materialize a full Session here;
            // surfaced so the caller can decide whether to probe
            // further or just warn.
            outcome.unclaimed_live.push(live_id.clone());
        }
    }

    if !outcome.unclaimed_live.is_empty() {
        warn!(sessions = ?outcome.unclaimed_live, "live PTYs with no matching store session");
    }

    Ok(outcome)
}

async fn idle_demote(store: &Store, id: &str) -> Result<()> {
    store.update_state_with_timestamp(id, SessionState::Idle, Utc::now()).await?;
    if let Some(mut session) = store.get_session(id).await? {
        session.recoverable = true;
        store.upsert_session(session).await?;
    }
    Ok(())
}

/// Retries `Recover()` for the deferred set every 10 s, up to 3
/// attempts, then forces idle-demotion on whatever remains and emits a
/// warning. Spawned as a background task; does not block startup.
pub fn spawn_deferred_reconciler(
    store: Arc<Store>,
    backend: Arc<dyn PtyBackend>,
    deferred: Vec<String>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut remaining = deferred;
        for attempt in 1..=3 {
            if remaining.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
            let report = match backend.recover(&remaining).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(attempt, error = %e, "deferred recovery attempt failed");
                    continue;
                }
            };
            let live: HashSet<String> = match backend.session_ids().await {
                Ok(ids) => ids.into_iter().collect(),
                Err(_) => HashSet::new(),
            };
            remaining.retain(|id| !live.contains(id));
            if report.failed.is_empty() && remaining.is_empty() {
                info!(attempt, "deferred recovery converged");
                return;
            }
        }

        if !remaining.is_empty() {
            for id in &remaining {
                if let Err(e) = idle_demote(&store, id).await {
                    warn!(session_id = %id, error = %e, "failed to force idle-demote after deferred recovery budget exhausted");
                }
            }
            let message = format!("forced idle-demotion on {} session(s) after recovery retries were exhausted", remaining.len());
            warn!("{message}");
            let _ = store
                .add_warning(attn_core::types::Warning {
                    code: "recovery_forced_idle".to_string(),
                    message,
                })
                .await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use attn_pty::{AttachInfo, RecoveryReport, SpawnOptions};

    struct FakeBackend {
        live: Vec<String>,
    }

    #[async_trait]
    impl PtyBackend for FakeBackend {
        async fn spawn(&self, _opts: SpawnOptions) -> attn_pty::Result<()> {
            Ok(())
        }
        async fn attach(&self, _id: &str, _seq: Option<u64>) -> attn_pty::Result<AttachInfo> {
            Err(attn_pty::PtyError::SessionNotFound("n/a".into()))
        }
        async fn input(&self, _id: &str, _data: &[u8]) -> attn_pty::Result<()> {
            Ok(())
        }
        async fn resize(&self, _id: &str, _c: u16, _r: u16) -> attn_pty::Result<()> {
            Ok(())
        }
        async fn kill(&self, _id: &str, _s: Option<i32>) -> attn_pty::Result<()> {
            Ok(())
        }
        async fn remove(&self, _id: &str) -> attn_pty::Result<()> {
            Ok(())
        }
        async fn session_ids(&self) -> attn_pty::Result<Vec<String>> {
            Ok(self.live.clone())
        }
        async fn is_alive(&self, id: &str) -> attn_pty::Result<bool> {
            Ok(self.live.contains(&id.to_string()))
        }
        async fn last_activity(&self, _id: &str) -> attn_pty::Result<Option<chrono::DateTime<chrono::Utc>>> {
            Ok(None)
        }
        async fn recover(&self, known: &[String]) -> attn_pty::Result<RecoveryReport> {
            Ok(RecoveryReport {
                recovered: known.iter().filter(|id| self.live.contains(id)).cloned().collect(),
                orphaned: known.iter().filter(|id| !self.live.contains(id)).cloned().collect(),
                failed: Vec::new(),
            })
        }
        async fn shutdown(&self) -> attn_pty::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn non_claude_session_with_missing_pty_is_removed() {
        let store = Store::open_in_memory().await.unwrap();
        let session = attn_core::types::Session::new("s1", "demo", attn_core::types::AgentKind::Codex, "/tmp");
        store.upsert_session(session).await.unwrap();
        let backend = FakeBackend { live: Vec::new() };
        let outcome = reconcile_startup(&store, &backend, Utc::now()).await.unwrap();
        assert_eq!(outcome.removed, vec!["s1".to_string()]);
        assert!(store.get_session("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claude_session_with_missing_pty_and_clean_report_is_idled() {
        let store = Store::open_in_memory().await.unwrap();
        let session = attn_core::types::Session::new("s1", "demo", attn_core::types::AgentKind::Claude, "/tmp");
        store.upsert_session(session).await.unwrap();
        let backend = FakeBackend { live: Vec::new() };
        let outcome = reconcile_startup(&store, &backend, Utc::now()).await.unwrap();
        assert_eq!(outcome.idled, vec!["s1".to_string()]);
        let session = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.recoverable);
    }

    #[tokio::test]
    async fn live_pty_present_touches_session() {
        let store = Store::open_in_memory().await.unwrap();
        let session = attn_core::types::Session::new("s1", "demo", attn_core::types::AgentKind::Claude, "/tmp");
        store.upsert_session(session).await.unwrap();
        let backend = FakeBackend { live: vec!["s1".to_string()] };
        let outcome = reconcile_startup(&store, &backend, Utc::now()).await.unwrap();
        assert_eq!(outcome.recovered, vec!["s1".to_string()]);
    }
}
