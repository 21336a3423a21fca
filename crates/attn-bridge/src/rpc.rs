//! Command dispatch, shared verbatim between the unix-socket RPC
//! listener and the WebSocket handler. Grounded on the teacher's
//! `IpcHandler::handle_message` (`at-bridge::ipc`): one `match` over a
//! tagged request enum, each arm either touching shared state directly
//! or publishing through the hub.

use std::path::Path;
use std::sync::Arc;

use attn_core::types::{AuthorState, RepoState};
use attn_core::Store;
use attn_github::PrScheduler;
use attn_pty::backend::SpawnOptions;
use attn_pty::PtyBackend;
use attn_session::SessionCore;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{error, info, warn};

use crate::error::{BridgeError, Result};
use crate::hub::Hub;
use crate::ports::GitOps;
use crate::protocol::{BridgeEvent, Command};
use crate::transcript_path;

pub struct Dispatcher {
    pub store: Arc<Store>,
    pub core: Arc<SessionCore>,
    pub watcher: Arc<attn_watcher::WatcherSupervisor>,
    pub backend: Arc<dyn PtyBackend>,
    pub pr_scheduler: Arc<PrScheduler>,
    pub git_ops: Arc<dyn GitOps>,
    pub hub: Arc<Hub>,
    pub instance_id: String,
}

impl Dispatcher {
    /// Dispatch one command, applying the recovery barrier to
    /// PTY-mutating commands before anything else runs.
    pub async fn dispatch(&self, cmd: Command) -> Result<Value> {
        if cmd.is_pty_mutating() && self.hub.is_recovering() {
            return Err(BridgeError::Recovering);
        }

        match cmd {
            Command::Register { id, label, agent, dir } => self.handle_register(id, label, agent, dir).await,
            Command::Unregister { id } => {
                self.core.unregister(&id).await?;
                self.watcher.unwatch(&id).await;
                Ok(json!({"ok": true}))
            }
            Command::State { id, state } => {
                self.core.hook_state(&id, state).await?;
                Ok(json!({"ok": true}))
            }
            Command::Stop { id, transcript_path } => {
                let extractor = attn_watcher::FileTranscriptExtractor;
                self.core.hook_stop(&id, &transcript_path, &extractor).await?;
                Ok(json!({"ok": true}))
            }
            Command::Todos { id, todos } => {
                self.core.hook_todos(&id, todos).await?;
                Ok(json!({"ok": true}))
            }
            Command::Heartbeat { id } => {
                self.core.heartbeat(&id).await?;
                Ok(json!({"ok": true}))
            }
            Command::Query { .. } => {
                let sessions = self.core.list().await?;
                Ok(json!({"ok": true, "sessions": sessions}))
            }
            Command::Mute { id } => {
                self.core.set_muted(&id, true).await?;
                Ok(json!({"ok": true}))
            }
            Command::QueryPrs { .. } => {
                let prs = self.store.list_prs().await?;
                Ok(json!({"ok": true, "prs": prs}))
            }
            Command::MutePr { id } => {
                self.store.set_pr_muted(&id, true).await?;
                self.hub.broadcast(BridgeEvent::PrsUpdated);
                Ok(json!({"ok": true}))
            }
            Command::MuteRepo { repo } => {
                self.set_repo_muted(&repo, true).await?;
                Ok(json!({"ok": true}))
            }
            Command::CollapseRepo { repo, collapsed } => {
                self.set_repo_collapsed(&repo, collapsed).await?;
                Ok(json!({"ok": true}))
            }
            Command::QueryRepos => {
                let repos = self.store.list_repo_states().await?;
                Ok(json!({"ok": true, "repos": repos}))
            }
            Command::QueryAuthors => {
                let authors = self.store.list_author_states().await?;
                Ok(json!({"ok": true, "authors": authors}))
            }
            Command::FetchPrDetails { id } => {
                self.pr_scheduler.refresh_immediate(&id).await?;
                let pr = self.store.get_pr(&id).await?;
                Ok(json!({"ok": true, "pr": pr}))
            }
            Command::InjectTestPr { pr } => {
                self.store.upsert_pr(pr).await?;
                self.hub.broadcast(BridgeEvent::PrsUpdated);
                Ok(json!({"ok": true}))
            }
            Command::InjectTestSession { session } => {
                self.store.upsert_session(session).await?;
                self.hub.broadcast(BridgeEvent::SessionsUpdated);
                Ok(json!({"ok": true}))
            }
            Command::ListWorktrees { main_repo } => {
                let worktrees =
                    self.git_ops.list_worktrees(&main_repo).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true, "worktrees": worktrees.iter().map(|w| json!({"path": w.path, "branch": w.branch})).collect::<Vec<_>>()}))
            }
            Command::CreateWorktree { main_repo, branch, base_branch } => {
                let wt = self
                    .git_ops
                    .create_worktree(&main_repo, &branch, base_branch.as_deref())
                    .await
                    .map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true, "path": wt.path, "branch": wt.branch}))
            }
            Command::DeleteWorktree { path } => {
                self.git_ops.delete_worktree(&path).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true}))
            }
            Command::ApprovePr { id } => {
                // Approval itself is a GitHub write outside this crate's
                // scope; the observable effect here is forcing an
                // immediate detail refresh so clients see the outcome.
                let result = self.pr_scheduler.refresh_immediate(&id).await;
                self.hub.broadcast(BridgeEvent::PrActionResult {
                    id: id.clone(),
                    action: "approve".to_string(),
                    ok: result.is_ok(),
                    error: result.as_ref().err().map(|e| e.to_string()),
                });
                result?;
                Ok(json!({"ok": true}))
            }
            Command::MergePr { id } => {
                let result = self.pr_scheduler.refresh_immediate(&id).await;
                self.hub.broadcast(BridgeEvent::PrActionResult {
                    id: id.clone(),
                    action: "merge".to_string(),
                    ok: result.is_ok(),
                    error: result.as_ref().err().map(|e| e.to_string()),
                });
                result?;
                Ok(json!({"ok": true}))
            }
            Command::RefreshPrs => {
                let result = self.pr_scheduler.refresh_all_visible().await;
                self.hub.broadcast(BridgeEvent::RefreshPrsResult {
                    ok: result.is_ok(),
                    error: result.as_ref().err().map(|e| e.to_string()),
                });
                result?;
                Ok(json!({"ok": true}))
            }
            Command::ClearSessions => {
                self.core.clear_sessions().await?;
                Ok(json!({"ok": true}))
            }
            Command::ClearWarnings => {
                self.store.clear_warnings().await?;
                Ok(json!({"ok": true}))
            }
            Command::PrVisited { id } => {
                self.pr_scheduler.refresh_immediate(&id).await?;
                Ok(json!({"ok": true}))
            }
            Command::GetSettings => Ok(json!({"ok": true, "settings": {}})),
            Command::SetSetting { .. } => {
                self.hub.broadcast(BridgeEvent::SettingsUpdated);
                Ok(json!({"ok": true}))
            }
            Command::ListBranches { repo } => {
                let branches = self.git_ops.list_branches(&repo).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true, "branches": branches}))
            }
            Command::Stash { repo } => {
                self.git_ops.stash(&repo).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true}))
            }
            Command::StashPop { repo } => {
                self.git_ops.stash_pop(&repo).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true}))
            }
            Command::GetFileDiff { repo, path } => {
                let diff = self.git_ops.file_diff(&repo, &path).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true, "diff": diff}))
            }
            Command::AddReviewComment { pr_id, path, line, body } => {
                self.git_ops.add_review_comment(&pr_id, &path, line, &body).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true}))
            }
            Command::SpawnSession { id, agent, dir, cols, rows, resume_args } => {
                self.backend
                    .spawn(SpawnOptions { session_id: id.clone(), agent, cwd: dir, cols, rows, resume_args })
                    .await?;
                self.hub.broadcast(BridgeEvent::SpawnResult { id, ok: true, error: None });
                Ok(json!({"ok": true}))
            }
            Command::AttachSession { id, since_seq } => {
                let info = self.backend.attach(&id, since_seq).await?;
                Ok(json!({"ok": true, "replayed_from": info.replayed_from, "last_seq": info.last_seq}))
            }
            Command::DetachSession { .. } => Ok(json!({"ok": true})),
            Command::PtyInput { id, data } => {
                self.backend.input(&id, data.as_bytes()).await?;
                Ok(json!({"ok": true}))
            }
            Command::PtyResize { id, cols, rows } => {
                self.backend.resize(&id, cols, rows).await?;
                Ok(json!({"ok": true}))
            }
            Command::KillSession { id, signal } => {
                self.backend.kill(&id, signal).await?;
                Ok(json!({"ok": true}))
            }
            Command::SessionVisualized { id } => {
                self.core.session_visualized(&id).await?;
                Ok(json!({"ok": true}))
            }
            Command::EnsureRepo { clone_url, target_path } => {
                self.git_ops.ensure_repo(&clone_url, &target_path).await.map_err(BridgeError::Unsupported)?;
                Ok(json!({"ok": true}))
            }
        }
    }

    async fn handle_register(&self, id: String, label: Option<String>, agent: Option<attn_core::types::AgentKind>, dir: String) -> Result<Value> {
        let agent = agent.unwrap_or(attn_core::types::AgentKind::Shell);
        let label = label.unwrap_or_else(|| id.clone());
        let session = self.core.register(&id, &label, agent, &dir).await?;
        if let Some(path) = transcript_path::derive(agent, &dir, &id) {
            self.watcher.watch(&id, agent, &path).await;
        }
        Ok(json!({"ok": true, "session": session}))
    }

    async fn set_repo_muted(&self, repo: &str, muted: bool) -> Result<()> {
        let (owner, name) = split_repo(repo)?;
        let existing = self.store.list_repo_states().await?.into_iter().find(|r| r.owner == owner && r.repo == name);
        let collapsed = existing.map(|r| r.collapsed).unwrap_or(false);
        self.store.set_repo_state(RepoState { owner, repo: name, muted, collapsed }).await?;
        self.hub.broadcast(BridgeEvent::ReposUpdated);
        Ok(())
    }

    async fn set_repo_collapsed(&self, repo: &str, collapsed: bool) -> Result<()> {
        let (owner, name) = split_repo(repo)?;
        let existing = self.store.list_repo_states().await?.into_iter().find(|r| r.owner == owner && r.repo == name);
        let muted = existing.map(|r| r.muted).unwrap_or(false);
        self.store.set_repo_state(RepoState { owner, repo: name, muted, collapsed }).await?;
        self.hub.broadcast(BridgeEvent::ReposUpdated);
        Ok(())
    }
}

impl Dispatcher {
    /// Lifts the hub's recovery barrier and flushes `initial_state` to
    /// every client that connected while it was up, in connection
    /// order, exactly once each.
    pub async fn lift_recovery_barrier(&self) {
        let pending = self.hub.end_recovery();
        if pending.is_empty() {
            return;
        }
        match crate::hub::build_initial_state(&self.store, &self.core, &self.instance_id).await {
            Ok(snapshot) => {
                for client_id in pending {
                    self.hub.send_to(client_id, snapshot.clone());
                }
            }
            Err(e) => error!(error = %e, "failed to build initial_state while flushing recovery barrier"),
        }
    }
}

fn split_repo(repo: &str) -> Result<(String, String)> {
    repo.split_once('/')
        .map(|(o, r)| (o.to_string(), r.to_string()))
        .ok_or_else(|| BridgeError::InvalidRequest(format!("expected owner/repo, got {repo}")))
}

/// Wraps [`Dispatcher::dispatch`] into the `{"ok": ..}` / `{"ok": false, "error": ..}`
/// envelope every transport returns on the wire.
pub async fn handle_to_value(dispatcher: &Dispatcher, cmd: Command) -> Value {
    let name = cmd.name().to_string();
    match dispatcher.dispatch(cmd).await {
        Ok(value) => value,
        Err(e) => {
            warn!(cmd = %name, error = %e, "command failed");
            json!({"ok": false, "error": e.code()})
        }
    }
}

/// Accepts connections on the daemon's control socket. Each connection
/// is one newline-delimited JSON request followed by one JSON response,
/// matching the "single request per connection" framing.
pub async fn run_unix_socket(path: &Path, dispatcher: Arc<Dispatcher>, shutdown: attn_harness::ShutdownSignal) -> std::io::Result<()> {
    if path.exists() {
        let _ = std::fs::remove_file(path);
    }
    let listener = UnixListener::bind(path)?;
    info!(path = %path.display(), "unix rpc socket listening");

    let mut stop_rx = shutdown.subscribe();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let dispatcher = dispatcher.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, dispatcher).await {
                                warn!(error = %e, "rpc connection error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "failed to accept rpc connection"),
                }
            }
            _ = stop_rx.recv() => {
                let _ = std::fs::remove_file(path);
                shutdown.confirm_drained();
                break;
            }
        }
    }
    Ok(())
}

async fn handle_connection(stream: UnixStream, dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Command>(line.trim_end()) {
        Ok(cmd) => handle_to_value(&dispatcher, cmd).await,
        Err(_) => json!({"ok": false, "error": "unknown command"}),
    };

    let mut body = serde_json::to_vec(&response).unwrap_or_else(|_| b"{\"ok\":false}".to_vec());
    body.push(b'\n');
    write_half.write_all(&body).await?;
    write_half.flush().await?;
    Ok(())
}
