use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Claude,
    Codex,
    Copilot,
    Shell,
}

impl AgentKind {
    /// Only Claude sessions may be reattached to a recovered PTY after a
    /// daemon restart.
    pub fn is_recoverable_kind(&self) -> bool {
        matches!(self, AgentKind::Claude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Launching,
    Working,
    WaitingInput,
    PendingApproval,
    Idle,
    Unknown,
}

impl SessionState {
    /// A session in these states always has (or very recently had) a
    /// backing PTY.
    pub fn expects_live_pty(&self) -> bool {
        matches!(self, SessionState::Working | SessionState::PendingApproval)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Launching => "launching",
            SessionState::Working => "working",
            SessionState::WaitingInput => "waiting_input",
            SessionState::PendingApproval => "pending_approval",
            SessionState::Idle => "idle",
            SessionState::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Completed,
    InProgress,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Todo {
    pub text: String,
    pub status: TodoStatus,
}

impl Todo {
    /// Render with the UI's 3-state prefix convention.
    pub fn with_prefix(&self) -> String {
        let prefix = match self.status {
            TodoStatus::Completed => "[x]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Pending => "[ ]",
        };
        format!("{prefix} {}", self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchInfo {
    pub branch_name: String,
    pub is_worktree: bool,
    pub main_repo_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub label: String,
    pub working_dir: String,
    pub agent: AgentKind,
    pub state: SessionState,
    /// Wall-clock time the session entered its current state.
    pub state_since: DateTime<Utc>,
    /// Wall-clock time of the last successful state CAS write.
    pub state_updated_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub branch: Option<BranchInfo>,
    pub todos: Vec<Todo>,
    pub muted: bool,
    pub recoverable: bool,
    /// Set while classification of a long-running session is deferred
    /// pending a `session_visualized` event (see the long-run rule).
    #[serde(default)]
    pub needs_review_after_long_run: bool,
}

impl Session {
    pub fn new(id: impl Into<String>, label: impl Into<String>, agent: AgentKind, working_dir: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            label: label.into(),
            working_dir: working_dir.into(),
            agent,
            state: SessionState::Launching,
            state_since: now,
            state_updated_at: now,
            last_seen: now,
            branch: None,
            todos: Vec::new(),
            muted: false,
            recoverable: false,
            needs_review_after_long_run: false,
        }
    }

    /// `true` if the session has at least one todo that is not `Completed`.
    pub fn has_incomplete_todos(&self) -> bool {
        self.todos.iter().any(|t| t.status != TodoStatus::Completed)
    }
}

// ---------------------------------------------------------------------------
// Pull request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrRole {
    Author,
    Reviewer,
    Mentioned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrState {
    Waiting,
    Approved,
    Merged,
    Closed,
    Draft,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrReason {
    ReadyToMerge,
    ChangesRequested,
    CiFailing,
    AwaitingReview,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Heat {
    Hot,
    Warm,
    Cold,
}

impl Heat {
    /// One step of monotonic cooling: hot -> warm -> cold -> cold.
    pub fn decay(self) -> Heat {
        match self {
            Heat::Hot => Heat::Warm,
            Heat::Warm => Heat::Cold,
            Heat::Cold => Heat::Cold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pr {
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub title: String,
    pub url: String,
    pub role: PrRole,
    pub state: PrState,
    pub reason: PrReason,
    pub heat: Heat,
    pub last_updated: DateTime<Utc>,
    pub last_polled: DateTime<Utc>,
    pub head_sha: String,
    pub head_branch: String,
    pub ci_status: Option<String>,
    pub review_status: Option<String>,
    pub mergeable: Option<bool>,
    pub mergeable_state: Option<String>,
    pub muted: bool,
}

impl Pr {
    /// Composite ID `host:owner/repo#number`. Parsed from, and never
    /// rewritten after, these components.
    pub fn id(&self) -> String {
        format!("{}:{}/{}#{}", self.host, self.owner, self.repo, self.number)
    }

    /// Key identifying the repo this PR belongs to, for RepoState lookups.
    pub fn repo_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Parse a composite PR ID of the form `host:owner/repo#number`.
pub fn parse_pr_id(id: &str) -> Option<(String, String, String, u64)> {
    let (host, rest) = id.split_once(':')?;
    let (repo_path, number_str) = rest.split_once('#')?;
    let (owner, repo) = repo_path.split_once('/')?;
    let number: u64 = number_str.parse().ok()?;
    Some((host.to_string(), owner.to_string(), repo.to_string(), number))
}

// ---------------------------------------------------------------------------
// RepoState / AuthorState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepoState {
    pub owner: String,
    pub repo: String,
    pub muted: bool,
    pub collapsed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorState {
    pub login: String,
    pub muted: bool,
    pub collapsed: bool,
}

// ---------------------------------------------------------------------------
// RecentLocation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentLocation {
    pub path: String,
    pub label: String,
    pub last_used: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Warning
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Warning {
    pub code: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// DaemonInstanceId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonInstanceId(pub uuid::Uuid);

impl DaemonInstanceId {
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for DaemonInstanceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pr_id_roundtrips() {
        let pr = Pr {
            host: "github.com".into(),
            owner: "acme".into(),
            repo: "widgets".into(),
            number: 42,
            title: "t".into(),
            url: "u".into(),
            role: PrRole::Author,
            state: PrState::Waiting,
            reason: PrReason::Unknown,
            heat: Heat::Hot,
            last_updated: Utc::now(),
            last_polled: Utc::now(),
            head_sha: "abc".into(),
            head_branch: "main".into(),
            ci_status: None,
            review_status: None,
            mergeable: None,
            mergeable_state: None,
            muted: false,
        };
        let id = pr.id();
        assert_eq!(id, "github.com:acme/widgets#42");
        let parsed = parse_pr_id(&id).unwrap();
        assert_eq!(parsed, ("github.com".into(), "acme".into(), "widgets".into(), 42));
    }

    #[test]
    fn heat_decays_monotonically() {
        assert_eq!(Heat::Hot.decay(), Heat::Warm);
        assert_eq!(Heat::Warm.decay(), Heat::Cold);
        assert_eq!(Heat::Cold.decay(), Heat::Cold);
    }

    #[test]
    fn session_state_display() {
        assert_eq!(SessionState::PendingApproval.to_string(), "pending_approval");
    }

    #[test]
    fn only_claude_is_recoverable_kind() {
        assert!(AgentKind::Claude.is_recoverable_kind());
        assert!(!AgentKind::Codex.is_recoverable_kind());
        assert!(!AgentKind::Copilot.is_recoverable_kind());
        assert!(!AgentKind::Shell.is_recoverable_kind());
    }

    #[test]
    fn session_has_incomplete_todos() {
        let mut s = Session::new("s1", "l", AgentKind::Claude, "/tmp");
        assert!(!s.has_incomplete_todos());
        s.todos.push(Todo { text: "a".into(), status: TodoStatus::Pending });
        assert!(s.has_incomplete_todos());
    }
}
