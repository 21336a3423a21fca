use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::StoreError;
use crate::types::{
    AuthorState, BranchInfo, Heat, Pr, PrReason, PrRole, PrState, RecentLocation, RepoState,
    Session, SessionState, Todo, Warning,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    working_dir TEXT NOT NULL,
    agent TEXT NOT NULL,
    state TEXT NOT NULL,
    state_since TEXT NOT NULL,
    state_updated_at TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    branch_json TEXT,
    todos_json TEXT NOT NULL DEFAULT '[]',
    muted INTEGER NOT NULL DEFAULT 0,
    recoverable INTEGER NOT NULL DEFAULT 0,
    needs_review_after_long_run INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS prs (
    id TEXT PRIMARY KEY,
    host TEXT NOT NULL,
    owner TEXT NOT NULL,
    repo TEXT NOT NULL,
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    role TEXT NOT NULL,
    state TEXT NOT NULL,
    reason TEXT NOT NULL,
    heat TEXT NOT NULL,
    last_updated TEXT NOT NULL,
    last_polled TEXT NOT NULL,
    head_sha TEXT NOT NULL,
    head_branch TEXT NOT NULL,
    ci_status TEXT,
    review_status TEXT,
    mergeable INTEGER,
    mergeable_state TEXT,
    muted INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS repo_state (
    key TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    repo TEXT NOT NULL,
    muted INTEGER NOT NULL DEFAULT 0,
    collapsed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS author_state (
    login TEXT PRIMARY KEY,
    muted INTEGER NOT NULL DEFAULT 0,
    collapsed INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS recent_locations (
    path TEXT PRIMARY KEY,
    label TEXT NOT NULL,
    last_used TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS warnings (
    code TEXT NOT NULL,
    message TEXT NOT NULL,
    PRIMARY KEY (code, message)
);
"#;

/// The sole authority for persisted sessions, PRs, and preference state.
/// Backed by SQLite via `tokio_rusqlite`, with an in-memory fallback for
/// degraded startup when the on-disk database cannot be opened.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Db(tokio_rusqlite::Error::Other(Box::new(e)))
            })?;
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    /// Degraded-startup fallback: an in-memory database with the same
    /// schema, used when the on-disk path cannot be opened.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    pub async fn upsert_session(&self, session: Session) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let branch_json = session
                    .branch
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                let todos_json = serde_json::to_string(&session.todos)
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                conn.execute(
                    "INSERT INTO sessions (id, label, working_dir, agent, state, state_since, \
                     state_updated_at, last_seen, branch_json, todos_json, muted, recoverable, \
                     needs_review_after_long_run) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                     ON CONFLICT(id) DO UPDATE SET \
                     label = excluded.label, working_dir = excluded.working_dir, \
                     agent = excluded.agent, state = excluded.state, \
                     state_since = excluded.state_since, \
                     state_updated_at = excluded.state_updated_at, \
                     last_seen = excluded.last_seen, branch_json = excluded.branch_json, \
                     todos_json = excluded.todos_json, muted = excluded.muted, \
                     recoverable = excluded.recoverable, \
                     needs_review_after_long_run = excluded.needs_review_after_long_run",
                    params![
                        session.id,
                        session.label,
                        session.working_dir,
                        agent_kind_to_str(session.agent),
                        session_state_to_str(session.state),
                        session.state_since.to_rfc3339(),
                        session.state_updated_at.to_rfc3339(),
                        session.last_seen.to_rfc3339(),
                        branch_json,
                        todos_json,
                        session.muted as i64,
                        session.recoverable as i64,
                        session.needs_review_after_long_run as i64,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let id = id.to_string();
        let session = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT id, label, working_dir, agent, state, state_since, \
                         state_updated_at, last_seen, branch_json, todos_json, muted, \
                         recoverable, needs_review_after_long_run FROM sessions WHERE id = ?1",
                        params![id],
                        row_to_session,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        session.transpose()
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, label, working_dir, agent, state, state_since, \
                     state_updated_at, last_seen, branch_json, todos_json, muted, recoverable, \
                     needs_review_after_long_run FROM sessions ORDER BY state_since ASC",
                )?;
                let rows = stmt
                    .query_map([], row_to_session)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    pub async fn remove_session(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn clear_sessions(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM sessions", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// The sole mechanism permitted to overwrite `state`/`state_updated_at`
    /// from the classifier path. Succeeds only if the session's current
    /// `state_updated_at` is no newer than `started_at`; returns `false`
    /// (not an error) when the write is discarded as stale.
    pub async fn update_state_with_timestamp(
        &self,
        id: &str,
        new_state: SessionState,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let id = id.to_string();
        let applied = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE sessions SET state = ?1, state_updated_at = ?2 \
                     WHERE id = ?3 AND state_updated_at <= ?4",
                    params![
                        session_state_to_str(new_state),
                        started_at.to_rfc3339(),
                        id,
                        started_at.to_rfc3339(),
                    ],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(applied)
    }

    pub async fn update_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sessions SET last_seen = ?1 WHERE id = ?2",
                    params![at.to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_todos(&self, id: &str, todos: Vec<Todo>) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let json = serde_json::to_string(&todos)
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                conn.execute(
                    "UPDATE sessions SET todos_json = ?1 WHERE id = ?2",
                    params![json, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_branch(&self, id: &str, branch: Option<BranchInfo>) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                let json = branch
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()
                    .map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))?;
                conn.execute(
                    "UPDATE sessions SET branch_json = ?1 WHERE id = ?2",
                    params![json, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_session_muted(&self, id: &str, muted: bool) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sessions SET muted = ?1 WHERE id = ?2",
                    params![muted as i64, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_needs_review_after_long_run(&self, id: &str, needs_review: bool) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sessions SET needs_review_after_long_run = ?1 WHERE id = ?2",
                    params![needs_review as i64, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // PRs
    // -----------------------------------------------------------------

    pub async fn upsert_pr(&self, pr: Pr) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                upsert_pr_row(conn, &pr)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_pr(&self, id: &str) -> Result<Option<Pr>, StoreError> {
        let id = id.to_string();
        let pr = self
            .conn
            .call(move |conn| {
                let row = conn
                    .query_row(
                        "SELECT host, owner, repo, number, title, url, role, state, reason, \
                         heat, last_updated, last_polled, head_sha, head_branch, ci_status, \
                         review_status, mergeable, mergeable_state, muted FROM prs WHERE id = ?1",
                        params![id],
                        row_to_pr,
                    )
                    .optional()?;
                Ok(row)
            })
            .await?;
        pr.transpose()
    }

    pub async fn list_prs(&self) -> Result<Vec<Pr>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT host, owner, repo, number, title, url, role, state, reason, heat, \
                     last_updated, last_polled, head_sha, head_branch, ci_status, \
                     review_status, mergeable, mergeable_state, muted FROM prs \
                     ORDER BY last_updated DESC",
                )?;
                let rows = stmt.query_map([], row_to_pr)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        rows.into_iter().collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    /// Atomically replace every PR belonging to `host` with `prs`. PRs
    /// for other hosts are left untouched, so a host skipped during a
    /// list poll (rate-limited or errored) keeps its last-known PRs
    /// rather than losing them.
    pub async fn replace_host_prs(&self, host: &str, prs: Vec<Pr>) -> Result<(), StoreError> {
        let host = host.to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM prs WHERE host = ?1", params![host])?;
                for pr in &prs {
                    upsert_pr_row(&tx, pr)?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn remove_pr(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute("DELETE FROM prs WHERE id = ?1", params![id])?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_pr_heat(&self, id: &str, heat: Heat) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE prs SET heat = ?1 WHERE id = ?2",
                    params![heat_to_str(heat), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Mark a PR hot, for the "triggered by user interaction" rule:
    /// visit, unmute, or approve.
    pub async fn touch_pr_hot(&self, id: &str) -> Result<(), StoreError> {
        self.set_pr_heat(id, Heat::Hot).await
    }

    /// Decay every PR one heat step, run once per scheduler cycle.
    pub async fn decay_all_pr_heat(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute(
                    "UPDATE prs SET heat = CASE heat \
                     WHEN 'hot' THEN 'warm' \
                     WHEN 'warm' THEN 'cold' \
                     ELSE 'cold' END",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_pr_muted(&self, id: &str, muted: bool) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE prs SET muted = ?1 WHERE id = ?2",
                    params![muted as i64, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // RepoState / AuthorState
    // -----------------------------------------------------------------

    pub async fn set_repo_state(&self, state: RepoState) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                let key = format!("{}/{}", state.owner, state.repo);
                conn.execute(
                    "INSERT INTO repo_state (key, owner, repo, muted, collapsed) \
                     VALUES (?1, ?2, ?3, ?4, ?5) \
                     ON CONFLICT(key) DO UPDATE SET muted = excluded.muted, \
                     collapsed = excluded.collapsed",
                    params![key, state.owner, state.repo, state.muted as i64, state.collapsed as i64],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_repo_states(&self) -> Result<Vec<RepoState>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT owner, repo, muted, collapsed FROM repo_state")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(RepoState {
                            owner: row.get(0)?,
                            repo: row.get(1)?,
                            muted: row.get::<_, i64>(2)? != 0,
                            collapsed: row.get::<_, i64>(3)? != 0,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn set_author_state(&self, state: AuthorState) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO author_state (login, muted, collapsed) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(login) DO UPDATE SET muted = excluded.muted, \
                     collapsed = excluded.collapsed",
                    params![state.login, state.muted as i64, state.collapsed as i64],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_author_states(&self) -> Result<Vec<AuthorState>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT login, muted, collapsed FROM author_state")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(AuthorState {
                            login: row.get(0)?,
                            muted: row.get::<_, i64>(1)? != 0,
                            collapsed: row.get::<_, i64>(2)? != 0,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------
    // RecentLocation
    // -----------------------------------------------------------------

    pub async fn record_recent_location(&self, location: RecentLocation) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO recent_locations (path, label, last_used) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(path) DO UPDATE SET label = excluded.label, \
                     last_used = excluded.last_used",
                    params![location.path, location.label, location.last_used.to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_recent_locations(&self, limit: u32) -> Result<Vec<RecentLocation>, StoreError> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT path, label, last_used FROM recent_locations \
                     ORDER BY last_used DESC LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit], |row| {
                        let last_used: String = row.get(2)?;
                        Ok(RecentLocation {
                            path: row.get(0)?,
                            label: row.get(1)?,
                            last_used: parse_rfc3339(&last_used),
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------
    // Warnings
    // -----------------------------------------------------------------

    pub async fn add_warning(&self, warning: Warning) -> Result<(), StoreError> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR IGNORE INTO warnings (code, message) VALUES (?1, ?2)",
                    params![warning.code, warning.message],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn list_warnings(&self) -> Result<Vec<Warning>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT code, message FROM warnings")?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(Warning { code: row.get(0)?, message: row.get(1)? })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn clear_warnings(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute("DELETE FROM warnings", [])?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

fn upsert_pr_row(conn: &rusqlite::Connection, pr: &Pr) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO prs (id, host, owner, repo, number, title, url, role, state, reason, \
         heat, last_updated, last_polled, head_sha, head_branch, ci_status, review_status, \
         mergeable, mergeable_state, muted) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, \
         ?18, ?19, ?20) \
         ON CONFLICT(id) DO UPDATE SET title = excluded.title, url = excluded.url, \
         role = excluded.role, state = excluded.state, reason = excluded.reason, \
         heat = excluded.heat, last_updated = excluded.last_updated, \
         last_polled = excluded.last_polled, head_sha = excluded.head_sha, \
         head_branch = excluded.head_branch, ci_status = excluded.ci_status, \
         review_status = excluded.review_status, mergeable = excluded.mergeable, \
         mergeable_state = excluded.mergeable_state, muted = excluded.muted",
        params![
            pr.id(),
            pr.host,
            pr.owner,
            pr.repo,
            pr.number,
            pr.title,
            pr.url,
            pr_role_to_str(pr.role),
            pr_state_to_str(pr.state),
            pr_reason_to_str(pr.reason),
            heat_to_str(pr.heat),
            pr.last_updated.to_rfc3339(),
            pr.last_polled.to_rfc3339(),
            pr.head_sha,
            pr.head_branch,
            pr.ci_status,
            pr.review_status,
            pr.mergeable.map(|b| b as i64),
            pr.mergeable_state,
            pr.muted as i64,
        ],
    )?;
    Ok(())
}

fn row_to_session(row: &Row<'_>) -> rusqlite::Result<Result<Session, StoreError>> {
    let agent: String = row.get(3)?;
    let state: String = row.get(4)?;
    let state_since: String = row.get(5)?;
    let state_updated_at: String = row.get(6)?;
    let last_seen: String = row.get(7)?;
    let branch_json: Option<String> = row.get(8)?;
    let todos_json: String = row.get(9)?;

    let parsed = (|| -> Result<Session, StoreError> {
        let branch = branch_json
            .map(|s| serde_json::from_str::<BranchInfo>(&s))
            .transpose()
            .map_err(json_err)?;
        let todos: Vec<Todo> = serde_json::from_str(&todos_json).map_err(json_err)?;
        Ok(Session {
            id: row.get(0)?,
            label: row.get(1)?,
            working_dir: row.get(2)?,
            agent: str_to_agent_kind(&agent),
            state: str_to_session_state(&state),
            state_since: parse_rfc3339(&state_since),
            state_updated_at: parse_rfc3339(&state_updated_at),
            last_seen: parse_rfc3339(&last_seen),
            branch,
            todos,
            muted: row.get::<_, i64>(10)? != 0,
            recoverable: row.get::<_, i64>(11)? != 0,
            needs_review_after_long_run: row.get::<_, i64>(12)? != 0,
        })
    })();
    Ok(parsed)
}

fn row_to_pr(row: &Row<'_>) -> rusqlite::Result<Result<Pr, StoreError>> {
    let role: String = row.get(6)?;
    let state: String = row.get(7)?;
    let reason: String = row.get(8)?;
    let heat: String = row.get(9)?;
    let last_updated: String = row.get(10)?;
    let last_polled: String = row.get(11)?;
    let mergeable: Option<i64> = row.get(16)?;

    let pr = Pr {
        host: row.get(0)?,
        owner: row.get(1)?,
        repo: row.get(2)?,
        number: row.get::<_, i64>(3)? as u64,
        title: row.get(4)?,
        url: row.get(5)?,
        role: str_to_pr_role(&role),
        state: str_to_pr_state(&state),
        reason: str_to_pr_reason(&reason),
        heat: str_to_heat(&heat),
        last_updated: parse_rfc3339(&last_updated),
        last_polled: parse_rfc3339(&last_polled),
        head_sha: row.get(12)?,
        head_branch: row.get(13)?,
        ci_status: row.get(14)?,
        review_status: row.get(15)?,
        mergeable: mergeable.map(|v| v != 0),
        mergeable_state: row.get(17)?,
        muted: row.get::<_, i64>(18)? != 0,
    };
    Ok(Ok(pr))
}

fn json_err(e: serde_json::Error) -> StoreError {
    StoreError::Db(tokio_rusqlite::Error::Other(Box::new(e)))
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn agent_kind_to_str(a: crate::types::AgentKind) -> &'static str {
    match a {
        crate::types::AgentKind::Claude => "claude",
        crate::types::AgentKind::Codex => "codex",
        crate::types::AgentKind::Copilot => "copilot",
        crate::types::AgentKind::Shell => "shell",
    }
}

fn str_to_agent_kind(s: &str) -> crate::types::AgentKind {
    match s {
        "codex" => crate::types::AgentKind::Codex,
        "copilot" => crate::types::AgentKind::Copilot,
        "shell" => crate::types::AgentKind::Shell,
        _ => crate::types::AgentKind::Claude,
    }
}

fn session_state_to_str(s: SessionState) -> &'static str {
    match s {
        SessionState::Launching => "launching",
        SessionState::Working => "working",
        SessionState::WaitingInput => "waiting_input",
        SessionState::PendingApproval => "pending_approval",
        SessionState::Idle => "idle",
        SessionState::Unknown => "unknown",
    }
}

fn str_to_session_state(s: &str) -> SessionState {
    match s {
        "working" => SessionState::Working,
        "waiting_input" => SessionState::WaitingInput,
        "pending_approval" => SessionState::PendingApproval,
        "idle" => SessionState::Idle,
        "unknown" => SessionState::Unknown,
        _ => SessionState::Launching,
    }
}

fn pr_role_to_str(r: PrRole) -> &'static str {
    match r {
        PrRole::Author => "author",
        PrRole::Reviewer => "reviewer",
        PrRole::Mentioned => "mentioned",
    }
}

fn str_to_pr_role(s: &str) -> PrRole {
    match s {
        "reviewer" => PrRole::Reviewer,
        "mentioned" => PrRole::Mentioned,
        _ => PrRole::Author,
    }
}

fn pr_state_to_str(s: PrState) -> &'static str {
    match s {
        PrState::Waiting => "waiting",
        PrState::Approved => "approved",
        PrState::Merged => "merged",
        PrState::Closed => "closed",
        PrState::Draft => "draft",
    }
}

fn str_to_pr_state(s: &str) -> PrState {
    match s {
        "approved" => PrState::Approved,
        "merged" => PrState::Merged,
        "closed" => PrState::Closed,
        "draft" => PrState::Draft,
        _ => PrState::Waiting,
    }
}

fn pr_reason_to_str(r: PrReason) -> &'static str {
    match r {
        PrReason::ReadyToMerge => "ready_to_merge",
        PrReason::ChangesRequested => "changes_requested",
        PrReason::CiFailing => "ci_failing",
        PrReason::AwaitingReview => "awaiting_review",
        PrReason::Unknown => "unknown",
    }
}

fn str_to_pr_reason(s: &str) -> PrReason {
    match s {
        "ready_to_merge" => PrReason::ReadyToMerge,
        "changes_requested" => PrReason::ChangesRequested,
        "ci_failing" => PrReason::CiFailing,
        "awaiting_review" => PrReason::AwaitingReview,
        _ => PrReason::Unknown,
    }
}

fn heat_to_str(h: Heat) -> &'static str {
    match h {
        Heat::Hot => "hot",
        Heat::Warm => "warm",
        Heat::Cold => "cold",
    }
}

fn str_to_heat(s: &str) -> Heat {
    match s {
        "hot" => Heat::Hot,
        "warm" => Heat::Warm,
        _ => Heat::Cold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AgentKind;

    async fn test_store() -> Store {
        Store::open_in_memory().await.expect("in-memory store opens")
    }

    #[tokio::test]
    async fn upsert_and_fetch_session() {
        let store = test_store().await;
        let session = Session::new("s1", "my session", AgentKind::Claude, "/tmp/proj");
        store.upsert_session(session.clone()).await.unwrap();
        let fetched = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(fetched.id, "s1");
        assert_eq!(fetched.state, SessionState::Launching);
    }

    #[tokio::test]
    async fn freshness_cas_rejects_stale_write() {
        let store = test_store().await;
        let mut session = Session::new("s1", "l", AgentKind::Claude, "/tmp");
        let later = session.state_updated_at + chrono::Duration::seconds(10);
        session.state_updated_at = later;
        store.upsert_session(session).await.unwrap();

        let stale_started_at = later - chrono::Duration::seconds(5);
        let applied = store
            .update_state_with_timestamp("s1", SessionState::Working, stale_started_at)
            .await
            .unwrap();
        assert!(!applied, "a write started before the last update must be discarded");

        let fetched = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(fetched.state, SessionState::Launching);
    }

    #[tokio::test]
    async fn freshness_cas_accepts_fresh_write() {
        let store = test_store().await;
        let session = Session::new("s1", "l", AgentKind::Claude, "/tmp");
        let base = session.state_updated_at;
        store.upsert_session(session).await.unwrap();

        let fresh_started_at = base + chrono::Duration::seconds(1);
        let applied = store
            .update_state_with_timestamp("s1", SessionState::Working, fresh_started_at)
            .await
            .unwrap();
        assert!(applied);

        let fetched = store.get_session("s1").await.unwrap().unwrap();
        assert_eq!(fetched.state, SessionState::Working);
    }

    #[tokio::test]
    async fn replace_host_prs_preserves_other_hosts() {
        let store = test_store().await;
        let pr_a = sample_pr("github.com", "acme", "a", 1);
        let pr_b = sample_pr("ghe.internal", "acme", "b", 2);
        store.upsert_pr(pr_a.clone()).await.unwrap();
        store.upsert_pr(pr_b.clone()).await.unwrap();

        store.replace_host_prs("github.com", vec![]).await.unwrap();

        let remaining = store.list_prs().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].host, "ghe.internal");
    }

    #[tokio::test]
    async fn heat_decays_one_step_per_call() {
        let store = test_store().await;
        let pr = sample_pr("github.com", "acme", "a", 1);
        let id = pr.id();
        store.upsert_pr(pr).await.unwrap();
        store.set_pr_heat(&id, Heat::Hot).await.unwrap();

        store.decay_all_pr_heat().await.unwrap();
        assert_eq!(store.get_pr(&id).await.unwrap().unwrap().heat, Heat::Warm);

        store.decay_all_pr_heat().await.unwrap();
        assert_eq!(store.get_pr(&id).await.unwrap().unwrap().heat, Heat::Cold);

        store.decay_all_pr_heat().await.unwrap();
        assert_eq!(store.get_pr(&id).await.unwrap().unwrap().heat, Heat::Cold);
    }

    #[tokio::test]
    async fn warnings_dedup_by_code_and_message() {
        let store = test_store().await;
        let w = Warning { code: "gh_rate_limited".into(), message: "rate limited".into() };
        store.add_warning(w.clone()).await.unwrap();
        store.add_warning(w).await.unwrap();
        assert_eq!(store.list_warnings().await.unwrap().len(), 1);
    }

    fn sample_pr(host: &str, owner: &str, repo: &str, number: u64) -> Pr {
        let now = Utc::now();
        Pr {
            host: host.into(),
            owner: owner.into(),
            repo: repo.into(),
            number,
            title: "t".into(),
            url: "u".into(),
            role: PrRole::Author,
            state: PrState::Waiting,
            reason: PrReason::Unknown,
            heat: Heat::Cold,
            last_updated: now,
            last_polled: now,
            head_sha: "abc".into(),
            head_branch: "main".into(),
            ci_status: None,
            review_status: None,
            mergeable: None,
            mergeable_state: None,
            muted: false,
        }
    }
}
