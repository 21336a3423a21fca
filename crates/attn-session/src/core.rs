//! Session registration, hook RPC handlers, and the three-source state
//! reconciliation described for the session core.
//!
//! Grounded on `at-agents::state_machine`/`supervisor` for the shape of
//! a single struct owning a map of managed entities behind a lock and
//! exposing async handler methods; the transition table itself has no
//! teacher analog and is reasoned from first principles (freshness CAS,
//! per-turn dedup, long-run deferral).

use std::collections::HashMap;
use std::sync::Arc;

use attn_core::types::{AgentKind, RecentLocation, Session, SessionState};
use attn_core::{Config, Store};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::events::{EventSink, SessionEvent};
use crate::ports::{ClassifyError, ExtractedTurn, TranscriptClassifier, TranscriptExtractor};

#[derive(Debug, Default, Clone)]
struct TurnState {
    classified: Option<String>,
    classifying: Option<String>,
}

/// Owns the authoritative reconciliation rules for every session.
pub struct SessionCore {
    store: Arc<Store>,
    sink: Arc<dyn EventSink>,
    classifier: Arc<dyn TranscriptClassifier>,
    config: Config,
    turn_state: Mutex<HashMap<String, TurnState>>,
    /// Sessions whose classification is deferred pending
    /// `session_visualized`, keyed by session id.
    deferred: Mutex<HashMap<String, (ExtractedTurn, DateTime<Utc>)>>,
}

impl SessionCore {
    pub fn new(store: Arc<Store>, sink: Arc<dyn EventSink>, classifier: Arc<dyn TranscriptClassifier>, config: Config) -> Self {
        Self {
            store,
            sink,
            classifier,
            config,
            turn_state: Mutex::new(HashMap::new()),
            deferred: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_turn_state(&self) -> tokio::sync::MutexGuard<'_, HashMap<String, TurnState>> {
        self.turn_state.lock().await
    }

    async fn emit_session(&self, id: &str, wrap: impl FnOnce(Session) -> SessionEvent) -> Result<()> {
        if let Some(session) = self.store.get_session(id).await? {
            self.sink.emit(wrap(session));
        }
        Ok(())
    }

    // -- Hooks ---------------------------------------------------------

    pub async fn register(&self, id: &str, label: &str, agent: AgentKind, dir: &str) -> Result<Session> {
        let session = Session::new(id, label, agent, dir);
        self.store.upsert_session(session.clone()).await?;
        self.store
            .record_recent_location(RecentLocation {
                path: dir.to_string(),
                label: label.to_string(),
                last_used: Utc::now(),
            })
            .await?;
        info!(session_id = id, agent = ?agent, "session registered");
        self.sink.emit(SessionEvent::SessionRegistered { session: session.clone() });
        Ok(session)
    }

    pub async fn unregister(&self, id: &str) -> Result<()> {
        self.store.remove_session(id).await?;
        self.lock_turn_state().await.remove(id);
        self.deferred.lock().await.remove(id);
        self.sink.emit(SessionEvent::SessionUnregistered { id: id.to_string() });
        Ok(())
    }

    /// Authoritative hook state write. Hooks always carry the freshest
    /// possible timestamp, so the CAS almost never discards them; it
    /// still guards against a hook racing a concurrently in-flight
    /// write for the same session.
    pub async fn hook_state(&self, id: &str, state: SessionState) -> Result<()> {
        let started_at = Utc::now();
        self.store.get_session(id).await?.ok_or_else(|| SessionError::NotFound(id.to_string()))?;
        let applied = self.store.update_state_with_timestamp(id, state, started_at).await?;
        self.store.update_last_seen(id, started_at).await?;
        if applied {
            self.emit_session(id, |session| SessionEvent::SessionStateChanged { session }).await?;
        }
        Ok(())
    }

    pub async fn hook_todos(&self, id: &str, todos: Vec<attn_core::types::Todo>) -> Result<()> {
        self.store.set_todos(id, todos).await?;
        self.emit_session(id, |session| SessionEvent::SessionTodosUpdated { session }).await?;
        Ok(())
    }

    pub async fn heartbeat(&self, id: &str) -> Result<()> {
        self.store.update_last_seen(id, Utc::now()).await?;
        Ok(())
    }

    /// `stop` hook: decides between waiting-on-todos, deferred
    /// long-run review, or immediate classification.
    pub async fn hook_stop(&self, id: &str, transcript_path: &str, extractor: &dyn TranscriptExtractor) -> Result<()> {
        let started_at = Utc::now();
        let session = self.store.get_session(id).await?.ok_or_else(|| SessionError::NotFound(id.to_string()))?;

        if session.has_incomplete_todos() {
            let applied = self.store.update_state_with_timestamp(id, SessionState::WaitingInput, started_at).await?;
            if applied {
                self.emit_session(id, |session| SessionEvent::SessionStateChanged { session }).await?;
            }
            return Ok(());
        }

        let long_running = session.state == SessionState::Working
            && (started_at - session.state_since).num_seconds() as u64 > self.config.session.long_run_threshold_secs;

        let Some(turn) = extractor.extract_last_assistant_turn(id, transcript_path).await else {
            return Ok(());
        };

        if long_running {
            self.store.set_needs_review_after_long_run(id, true).await?;
            self.deferred.lock().await.insert(id.to_string(), (turn, started_at));
            debug!(session_id = id, "classification deferred pending session_visualized");
            return Ok(());
        }

        self.classify_and_apply(id, turn, started_at).await
    }

    /// `session_visualized`: runs any classification that was deferred
    /// by the long-run rule.
    pub async fn session_visualized(&self, id: &str) -> Result<()> {
        let pending = self.deferred.lock().await.remove(id);
        self.store.set_needs_review_after_long_run(id, false).await?;
        if let Some((turn, started_at)) = pending {
            self.classify_and_apply(id, turn, started_at).await?;
        }
        Ok(())
    }

    // -- PTY hints -------------------------------------------------------

    /// Apply a PTY-emitted state hint, subject to per-agent-kind
    /// admissibility rules that keep noisy redraw-heavy CLIs from
    /// flapping between states.
    pub async fn apply_pty_hint(&self, id: &str, hint: SessionState) -> Result<()> {
        let Some(session) = self.store.get_session(id).await? else {
            return Ok(());
        };
        if !pty_hint_admissible(session.agent, session.state, hint) {
            return Ok(());
        }
        let started_at = Utc::now();
        let applied = self.store.update_state_with_timestamp(id, hint, started_at).await?;
        if applied {
            self.emit_session(id, |session| SessionEvent::SessionStateChanged { session }).await?;
        }
        Ok(())
    }

    /// Direct transcript-derived state promotion/demotion (Codex's
    /// turn-boundary `waiting_input` promotion, Copilot's
    /// `pending_approval` inference). Unlike [`Self::apply_pty_hint`]
    /// this has no per-agent admissibility filter: the transcript
    /// watcher already encodes the agent-specific trigger condition
    /// before calling this.
    pub async fn force_state(&self, id: &str, state: SessionState) -> Result<()> {
        let started_at = Utc::now();
        let applied = self.store.update_state_with_timestamp(id, state, started_at).await?;
        if applied {
            self.emit_session(id, |session| SessionEvent::SessionStateChanged { session }).await?;
        }
        Ok(())
    }

    // -- Transcript-triggered classification -----------------------------

    /// Entry point used by the transcript watcher when its own trigger
    /// conditions are met (new turn, PTY quiet, hook stale or state
    /// outside {working, pending_approval}).
    pub async fn classify_triggered_turn(&self, id: &str, turn: ExtractedTurn) -> Result<()> {
        let started_at = Utc::now();
        self.classify_and_apply(id, turn, started_at).await
    }

    pub fn hook_is_fresh(&self, last_seen: DateTime<Utc>) -> bool {
        (Utc::now() - last_seen).num_seconds() as u64 <= self.config.session.hook_freshness_secs
    }

    async fn classify_and_apply(&self, id: &str, turn: ExtractedTurn, started_at: DateTime<Utc>) -> Result<()> {
        {
            let mut states = self.lock_turn_state().await;
            let entry = states.entry(id.to_string()).or_default();
            if entry.classified.as_deref() == Some(turn.turn_uuid.as_str())
                || entry.classifying.as_deref() == Some(turn.turn_uuid.as_str())
            {
                return Err(SessionError::NoNewAssistantTurn);
            }
            entry.classifying = Some(turn.turn_uuid.clone());
        }

        let label = self.run_classifier_with_retry(&turn.text).await;

        {
            let mut states = self.lock_turn_state().await;
            let entry = states.entry(id.to_string()).or_default();
            entry.classifying = None;
            entry.classified = Some(turn.turn_uuid.clone());
        }

        let new_state = match &label {
            Ok(s) => parse_state_label(s).unwrap_or(SessionState::Unknown),
            Err(_) => SessionState::Unknown,
        };
        if label.is_err() {
            warn!(session_id = id, "classifier call failed, falling back to unknown state");
        } else if matches!(new_state, SessionState::Unknown) {
            debug!(session_id = id, "classifier returned unknown label");
        }

        let applied = self.store.update_state_with_timestamp(id, new_state, started_at).await?;
        if applied {
            self.emit_session(id, |session| SessionEvent::SessionStateChanged { session }).await?;
        } else {
            debug!(session_id = id, "state update discarded: stale classifier write");
        }
        Ok(())
    }

    async fn run_classifier_with_retry(&self, text: &str) -> std::result::Result<String, ClassifyError> {
        let cfg = &self.config.classifier;
        let mut attempt = 0u32;
        loop {
            match self.classifier.classify(text).await {
                Ok(label) => return Ok(label),
                Err(ClassifyError::RateLimited { retry_after_secs }) if attempt < cfg.max_retries => {
                    let backoff_ms = cfg.base_backoff_ms * 2u64.pow(attempt);
                    let sleep_ms = retry_after_secs.map(|s| s * 1000).unwrap_or(backoff_ms);
                    tokio::time::sleep(std::time::Duration::from_millis(sleep_ms)).await;
                    attempt += 1;
                }
                Err(other) => return Err(other),
            }
        }
    }

    // -- Exit handling ---------------------------------------------------

    pub async fn session_exited(&self, id: &str, exit_code: Option<i32>, signal: Option<i32>) -> Result<()> {
        self.store.update_last_seen(id, Utc::now()).await?;
        let applied = self.store.update_state_with_timestamp(id, SessionState::Idle, Utc::now()).await?;
        if applied {
            self.emit_session(id, |session| SessionEvent::SessionStateChanged { session }).await?;
        }
        self.sink.emit(SessionEvent::SessionExited { id: id.to_string(), exit_code, signal });
        Ok(())
    }

    pub async fn set_muted(&self, id: &str, muted: bool) -> Result<()> {
        self.store.set_session_muted(id, muted).await?;
        Ok(())
    }

    pub async fn clear_sessions(&self) -> Result<()> {
        self.store.clear_sessions().await?;
        self.turn_state.lock().await.clear();
        self.deferred.lock().await.clear();
        self.sink.emit(SessionEvent::SessionsUpdated);
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<Session>> {
        Ok(self.store.list_sessions().await?)
    }
}

fn pty_hint_admissible(agent: AgentKind, current: SessionState, hint: SessionState) -> bool {
    match agent {
        AgentKind::Claude => true,
        AgentKind::Codex | AgentKind::Copilot => {
            if matches!(hint, SessionState::WaitingInput | SessionState::Idle) && current == SessionState::Working {
                return false;
            }
            if agent == AgentKind::Copilot
                && hint == SessionState::Working
                && current == SessionState::PendingApproval
            {
                return false;
            }
            true
        }
        AgentKind::Shell => true,
    }
}

fn parse_state_label(label: &str) -> Option<SessionState> {
    match label {
        "launching" => Some(SessionState::Launching),
        "working" => Some(SessionState::Working),
        "waiting_input" => Some(SessionState::WaitingInput),
        "pending_approval" => Some(SessionState::PendingApproval),
        "idle" => Some(SessionState::Idle),
        "unknown" => Some(SessionState::Unknown),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClassifier {
        label: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TranscriptClassifier for StubClassifier {
        async fn classify(&self, _text: &str) -> std::result::Result<String, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.label.clone())
        }
    }

    struct StubExtractor {
        uuid: String,
        text: String,
    }

    #[async_trait]
    impl TranscriptExtractor for StubExtractor {
        async fn extract_last_assistant_turn(&self, _id: &str, _path: &str) -> Option<ExtractedTurn> {
            Some(ExtractedTurn { turn_uuid: self.uuid.clone(), text: self.text.clone() })
        }
    }

    async fn core_with(label: &str) -> (SessionCore, Arc<StubClassifier>) {
        let store = Arc::new(Store::open_in_memory().await.unwrap());
        let classifier = Arc::new(StubClassifier { label: label.to_string(), calls: AtomicUsize::new(0) });
        let core = SessionCore::new(store, Arc::new(NullSink), classifier.clone(), Config::default());
        (core, classifier)
    }

    #[tokio::test]
    async fn register_creates_launching_session() {
        let (core, _) = core_with("working").await;
        let session = core.register("s1", "demo", AgentKind::Claude, "/tmp").await.unwrap();
        assert_eq!(session.state, SessionState::Launching);
    }

    #[tokio::test]
    async fn stop_with_incomplete_todos_sets_waiting_input() {
        let (core, classifier) = core_with("working").await;
        core.register("s1", "demo", AgentKind::Claude, "/tmp").await.unwrap();
        core.hook_todos(
            "s1",
            vec![attn_core::types::Todo { text: "thing".into(), status: attn_core::types::TodoStatus::Pending }],
        )
        .await
        .unwrap();
        let extractor = StubExtractor { uuid: "t1".into(), text: "done".into() };
        core.hook_stop("s1", "/tmp/transcript.jsonl", &extractor).await.unwrap();
        let session = core.store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::WaitingInput);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stop_without_todos_classifies_and_applies_label() {
        let (core, classifier) = core_with("waiting_input").await;
        core.register("s1", "demo", AgentKind::Claude, "/tmp").await.unwrap();
        let extractor = StubExtractor { uuid: "t1".into(), text: "done".into() };
        core.hook_stop("s1", "/tmp/transcript.jsonl", &extractor).await.unwrap();
        let session = core.store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::WaitingInput);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_turn_uuid_is_rejected() {
        let (core, classifier) = core_with("waiting_input").await;
        core.register("s1", "demo", AgentKind::Claude, "/tmp").await.unwrap();
        let turn = ExtractedTurn { turn_uuid: "t1".into(), text: "done".into() };
        core.classify_and_apply("s1", turn.clone(), Utc::now()).await.unwrap();
        let err = core.classify_and_apply("s1", turn, Utc::now()).await.unwrap_err();
        assert!(matches!(err, SessionError::NoNewAssistantTurn));
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_classifier_write_is_discarded() {
        let (core, _) = core_with("idle").await;
        core.register("s1", "demo", AgentKind::Claude, "/tmp").await.unwrap();
        let t0 = Utc::now();
        // A newer hook write lands "after" the classifier's started_at.
        core.hook_state("s1", SessionState::WaitingInput).await.unwrap();
        let turn = ExtractedTurn { turn_uuid: "t1".into(), text: "done".into() };
        core.classify_and_apply("s1", turn, t0).await.unwrap();
        let session = core.store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(session.state, SessionState::WaitingInput);
    }

    #[tokio::test]
    async fn long_running_session_defers_until_visualized() {
        let (core, classifier) = core_with("working").await;
        core.register("s1", "demo", AgentKind::Claude, "/tmp").await.unwrap();
        core.hook_state("s1", SessionState::Working).await.unwrap();
        // Force the session to look long-running.
        let mut session = core.store.get_session("s1").await.unwrap().unwrap();
        session.state_since = Utc::now() - chrono::Duration::seconds(301);
        core.store.upsert_session(session).await.unwrap();

        let extractor = StubExtractor { uuid: "t1".into(), text: "done".into() };
        core.hook_stop("s1", "/tmp/transcript.jsonl", &extractor).await.unwrap();
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
        let session = core.store.get_session("s1").await.unwrap().unwrap();
        assert!(session.needs_review_after_long_run);

        core.session_visualized("s1").await.unwrap();
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
        let session = core.store.get_session("s1").await.unwrap().unwrap();
        assert!(!session.needs_review_after_long_run);
    }

    #[test]
    fn codex_ignores_waiting_input_hint_while_working() {
        assert!(!pty_hint_admissible(AgentKind::Codex, SessionState::Working, SessionState::WaitingInput));
        assert!(pty_hint_admissible(AgentKind::Codex, SessionState::Working, SessionState::PendingApproval));
    }

    #[test]
    fn copilot_working_hint_does_not_clear_pending_approval() {
        assert!(!pty_hint_admissible(AgentKind::Copilot, SessionState::PendingApproval, SessionState::Working));
    }
}
