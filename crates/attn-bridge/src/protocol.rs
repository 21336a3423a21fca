//! Wire protocol shared by the unix-socket RPC and the WebSocket
//! channel: one tagged JSON object in, one tagged JSON object out.
//! Grounded on the `{"type": ..., "payload": ...}` shape of the
//! teacher's `BridgeMessage`, adjusted to a flat `cmd`/`event` tag to
//! match the line-delimited socket framing.

use attn_core::types::{AgentKind, Pr, Session, SessionState, Todo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every inbound request, whether it arrived over the unix socket or
/// the WebSocket. The unix socket only ever sees a subset of these in
/// practice (one request per connection, no PTY commands); nothing
/// stops it from reaching the rest, and keeping one dispatch table
/// means the two transports can never drift.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    Register { id: String, label: Option<String>, agent: Option<AgentKind>, dir: String },
    Unregister { id: String },
    State { id: String, state: SessionState },
    Stop { id: String, transcript_path: String },
    Todos { id: String, todos: Vec<Todo> },
    Heartbeat { id: String },
    Query { filter: Option<Value> },
    Mute { id: String },
    QueryPrs { filter: Option<Value> },
    MutePr { id: String },
    MuteRepo { repo: String },
    CollapseRepo { repo: String, collapsed: bool },
    QueryRepos,
    QueryAuthors,
    FetchPrDetails { id: String },
    InjectTestPr { pr: Pr },
    InjectTestSession { session: Session },
    ListWorktrees { main_repo: String },
    CreateWorktree { main_repo: String, branch: String, base_branch: Option<String> },
    DeleteWorktree { path: String },

    // WebSocket-only in practice, but dispatched identically.
    ApprovePr { id: String },
    MergePr { id: String },
    RefreshPrs,
    ClearSessions,
    ClearWarnings,
    PrVisited { id: String },
    GetSettings,
    SetSetting { key: String, value: Value },
    ListBranches { repo: String },
    Stash { repo: String },
    StashPop { repo: String },
    GetFileDiff { repo: String, path: String },
    AddReviewComment { pr_id: String, path: String, line: u32, body: String },
    SpawnSession {
        id: String,
        agent: AgentKind,
        dir: String,
        #[serde(default = "default_cols")]
        cols: u16,
        #[serde(default = "default_rows")]
        rows: u16,
        #[serde(default)]
        resume_args: Vec<String>,
    },
    AttachSession { id: String, since_seq: Option<u64> },
    DetachSession { id: String },
    PtyInput { id: String, data: String },
    PtyResize { id: String, cols: u16, rows: u16 },
    KillSession { id: String, signal: Option<i32> },
    SessionVisualized { id: String },
    EnsureRepo { clone_url: String, target_path: String },
}

fn default_cols() -> u16 {
    80
}
fn default_rows() -> u16 {
    24
}

impl Command {
    /// A handful of commands mutate or observe live PTY state and must
    /// be refused while startup recovery is still reconciling it.
    pub fn is_pty_mutating(&self) -> bool {
        matches!(
            self,
            Command::SpawnSession { .. }
                | Command::AttachSession { .. }
                | Command::DetachSession { .. }
                | Command::PtyInput { .. }
                | Command::PtyResize { .. }
                | Command::KillSession { .. }
                | Command::ClearSessions
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Register { .. } => "register",
            Command::Unregister { .. } => "unregister",
            Command::State { .. } => "state",
            Command::Stop { .. } => "stop",
            Command::Todos { .. } => "todos",
            Command::Heartbeat { .. } => "heartbeat",
            Command::Query { .. } => "query",
            Command::Mute { .. } => "mute",
            Command::QueryPrs { .. } => "query_prs",
            Command::MutePr { .. } => "mute_pr",
            Command::MuteRepo { .. } => "mute_repo",
            Command::CollapseRepo { .. } => "collapse_repo",
            Command::QueryRepos => "query_repos",
            Command::QueryAuthors => "query_authors",
            Command::FetchPrDetails { .. } => "fetch_pr_details",
            Command::InjectTestPr { .. } => "inject_test_pr",
            Command::InjectTestSession { .. } => "inject_test_session",
            Command::ListWorktrees { .. } => "list_worktrees",
            Command::CreateWorktree { .. } => "create_worktree",
            Command::DeleteWorktree { .. } => "delete_worktree",
            Command::ApprovePr { .. } => "approve_pr",
            Command::MergePr { .. } => "merge_pr",
            Command::RefreshPrs => "refresh_prs",
            Command::ClearSessions => "clear_sessions",
            Command::ClearWarnings => "clear_warnings",
            Command::PrVisited { .. } => "pr_visited",
            Command::GetSettings => "get_settings",
            Command::SetSetting { .. } => "set_setting",
            Command::ListBranches { .. } => "list_branches",
            Command::Stash { .. } => "stash",
            Command::StashPop { .. } => "stash_pop",
            Command::GetFileDiff { .. } => "get_file_diff",
            Command::AddReviewComment { .. } => "add_review_comment",
            Command::SpawnSession { .. } => "spawn_session",
            Command::AttachSession { .. } => "attach_session",
            Command::DetachSession { .. } => "detach_session",
            Command::PtyInput { .. } => "pty_input",
            Command::PtyResize { .. } => "pty_resize",
            Command::KillSession { .. } => "kill_session",
            Command::SessionVisualized { .. } => "session_visualized",
            Command::EnsureRepo { .. } => "ensure_repo",
        }
    }
}

/// Events broadcast out to connected clients. `initial_state` is sent
/// to exactly one client, once, right after it connects (or once the
/// recovery barrier lifts); everything else fans out to all clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    InitialState {
        sessions: Vec<Session>,
        prs: Vec<Pr>,
        repos: Vec<attn_core::types::RepoState>,
        authors: Vec<attn_core::types::AuthorState>,
        warnings: Vec<attn_core::types::Warning>,
        daemon_instance_id: String,
    },
    SessionRegistered { session: Session },
    SessionStateChanged { session: Session },
    SessionTodosUpdated { session: Session },
    SessionUnregistered { id: String },
    SessionExited { id: String, exit_code: Option<i32>, signal: Option<i32> },
    SessionsUpdated,
    PrsUpdated,
    ReposUpdated,
    AuthorsUpdated,
    SettingsUpdated,
    PrActionResult { id: String, action: String, ok: bool, error: Option<String> },
    RefreshPrsResult { ok: bool, error: Option<String> },
    RateLimited { resource: String, reset_at: DateTime<Utc> },
    GitStatusUpdate { repo: String, status: Value },
    PtyOutput { id: String, seq: u64, data: String },
    PtyDesync { id: String },
    SpawnResult { id: String, ok: bool, error: Option<String> },
    AttachResult { id: String, ok: bool, replayed_from: Option<u64>, error: Option<String> },
    CommandError { cmd: String, error: String },
}

/// The `/health` HTTP response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub protocol: u32,
    pub daemon_instance_id: String,
    pub sessions: usize,
    pub prs: usize,
    pub ws_clients: usize,
    pub github_available: bool,
}

/// Current wire protocol version, bumped whenever [`Command`] or
/// [`BridgeEvent`] gains a breaking change.
pub const PROTOCOL_VERSION: u32 = 1;
