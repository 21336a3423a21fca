//! Owns one tailer + per-agent processor per watched session and
//! drives them off a fixed polling tick, dispatching signals into the
//! session core.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use attn_core::types::{AgentKind, Session};
use attn_core::Config;
use attn_pty::PtyBackend;
use attn_session::SessionCore;
use chrono::Utc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::claude::ClaudeProcessor;
use crate::codex::CodexProcessor;
use crate::copilot::CopilotProcessor;
use crate::signal::WatcherSignal;
use crate::tail::FileTailer;

enum Processor {
    Claude(ClaudeProcessor),
    Codex(CodexProcessor),
    Copilot(CopilotProcessor),
}

struct Watched {
    tailer: FileTailer,
    processor: Processor,
}

/// Background supervisor for all transcript watchers. Spawned once by
/// the daemon; sessions are registered/unregistered as they come and
/// go.
pub struct WatcherSupervisor {
    core: Arc<SessionCore>,
    backend: Arc<dyn PtyBackend>,
    config: Config,
    watched: Mutex<HashMap<String, Watched>>,
}

impl WatcherSupervisor {
    pub fn new(core: Arc<SessionCore>, backend: Arc<dyn PtyBackend>, config: Config) -> Self {
        Self { core, backend, config, watched: Mutex::new(HashMap::new()) }
    }

    pub async fn watch(&self, session_id: &str, agent: AgentKind, transcript_path: &str) {
        if matches!(agent, AgentKind::Shell) {
            return;
        }
        let processor = match agent {
            AgentKind::Claude => Processor::Claude(ClaudeProcessor::new()),
            AgentKind::Codex => Processor::Codex(CodexProcessor::new()),
            AgentKind::Copilot => {
                let tools = self
                    .config
                    .watcher
                    .copilot_approval_gated_tools
                    .clone()
                    .unwrap_or_else(|| vec!["bash".to_string(), "create".to_string()]);
                Processor::Copilot(CopilotProcessor::new(tools))
            }
            AgentKind::Shell => return,
        };
        self.watched.lock().await.insert(
            session_id.to_string(),
            Watched { tailer: FileTailer::new(transcript_path), processor },
        );
    }

    pub async fn unwatch(&self, session_id: &str) {
        self.watched.lock().await.remove(session_id);
    }

    /// One polling tick across every watched session. Intended to be
    /// called in a loop on `config.watcher.poll_interval_ms`.
    pub async fn tick(&self) {
        let ids: Vec<String> = self.watched.lock().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.tick_one(&id).await {
                warn!(session_id = %id, error = %e, "transcript watcher tick failed");
            }
        }
    }

    async fn tick_one(&self, session_id: &str) -> crate::error::Result<()> {
        let Some(session) = self.core.list().await?.into_iter().find(|s| s.id == session_id) else {
            self.unwatch(session_id).await;
            return Ok(());
        };

        let now = Utc::now();
        let quiet_since = self.backend.last_activity(session_id).await.unwrap_or(None);
        let quiet_window = chrono::Duration::milliseconds(self.config.watcher.quiet_window_ms as i64);
        let hook_freshness = chrono::Duration::seconds(self.config.session.hook_freshness_secs as i64);
        let active_window = chrono::Duration::milliseconds(self.config.watcher.poll_interval_ms as i64 * 10);
        let grace = chrono::Duration::milliseconds(self.config.watcher.copilot_approval_grace_ms as i64);

        let mut watched = self.watched.lock().await;
        let Some(entry) = watched.get_mut(session_id) else { return Ok(()) };

        let lines = match entry.tailer.poll_lines() {
            Ok(lines) => lines,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "transcript tailer read failed");
                Vec::new()
            }
        };

        let mut signals = Vec::new();
        match &mut entry.processor {
            Processor::Claude(p) => {
                p.ingest(&lines);
                signals.extend(p.tick(quiet_since, quiet_window, now, session.last_seen, hook_freshness, session.state));
            }
            Processor::Codex(p) => {
                signals.extend(p.ingest(&lines, now, session.state));
                signals.extend(p.tick(now, active_window));
                if let Some(signal) =
                    p.take_classification_candidate(quiet_since, quiet_window, now, session.last_seen, hook_freshness, session.state)
                {
                    signals.push(signal);
                }
            }
            Processor::Copilot(p) => {
                p.ingest(&lines, now);
                signals.extend(p.tick(now, grace, session.state));
            }
        }
        drop(watched);

        self.dispatch(&session, signals).await
    }

    async fn dispatch(&self, session: &Session, signals: Vec<WatcherSignal>) -> crate::error::Result<()> {
        for signal in signals {
            match signal {
                WatcherSignal::ForceState(state) => {
                    self.core.force_state(&session.id, state).await?;
                }
                WatcherSignal::Classify(turn) => match self.core.classify_triggered_turn(&session.id, turn).await {
                    Ok(()) => {}
                    Err(attn_session::SessionError::NoNewAssistantTurn) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Ok(())
    }

    /// Runs [`Self::tick`] forever on the configured interval. Exits
    /// when `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: attn_harness::ShutdownSignal) {
        let mut stop_rx = shutdown.subscribe();
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.watcher.poll_interval_ms));
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick().await,
                _ = stop_rx.recv() => {
                    shutdown.confirm_drained();
                    break;
                }
            }
        }
    }
}
