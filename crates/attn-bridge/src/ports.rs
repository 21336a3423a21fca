//! Narrow contracts for the "external collaborators" named but not
//! specified in detail: git plumbing (branches, stash, diffs, review
//! comments) and worktree management. These are real git/filesystem
//! operations that belong to a working-copy manager outside this
//! crate's scope; the bridge depends on a trait so the dispatch table
//! can be wired to a real implementation without this crate knowing
//! its shape.

use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub path: String,
    pub branch: String,
}

#[async_trait]
pub trait GitOps: Send + Sync {
    async fn list_branches(&self, repo: &str) -> Result<Vec<String>, String>;
    async fn stash(&self, repo: &str) -> Result<(), String>;
    async fn stash_pop(&self, repo: &str) -> Result<(), String>;
    async fn file_diff(&self, repo: &str, path: &str) -> Result<String, String>;
    async fn add_review_comment(&self, pr_id: &str, path: &str, line: u32, body: &str) -> Result<(), String>;
    async fn list_worktrees(&self, main_repo: &str) -> Result<Vec<WorktreeInfo>, String>;
    async fn create_worktree(&self, main_repo: &str, branch: &str, base_branch: Option<&str>) -> Result<WorktreeInfo, String>;
    async fn delete_worktree(&self, path: &str) -> Result<(), String>;
    async fn ensure_repo(&self, clone_url: &str, target_path: &str) -> Result<(), String>;
    async fn git_status(&self, repo: &str) -> Result<Value, String>;
}

/// Default used when no real working-copy manager has been wired in.
/// Every operation fails with a descriptive message rather than
/// panicking, so a daemon built without git tooling still boots.
pub struct UnconfiguredGitOps;

#[async_trait]
impl GitOps for UnconfiguredGitOps {
    async fn list_branches(&self, _repo: &str) -> Result<Vec<String>, String> {
        Err("git integration not configured".to_string())
    }
    async fn stash(&self, _repo: &str) -> Result<(), String> {
        Err("git integration not configured".to_string())
    }
    async fn stash_pop(&self, _repo: &str) -> Result<(), String> {
        Err("git integration not configured".to_string())
    }
    async fn file_diff(&self, _repo: &str, _path: &str) -> Result<String, String> {
        Err("git integration not configured".to_string())
    }
    async fn add_review_comment(&self, _pr_id: &str, _path: &str, _line: u32, _body: &str) -> Result<(), String> {
        Err("git integration not configured".to_string())
    }
    async fn list_worktrees(&self, _main_repo: &str) -> Result<Vec<WorktreeInfo>, String> {
        Err("git integration not configured".to_string())
    }
    async fn create_worktree(&self, _main_repo: &str, _branch: &str, _base_branch: Option<&str>) -> Result<WorktreeInfo, String> {
        Err("git integration not configured".to_string())
    }
    async fn delete_worktree(&self, _path: &str) -> Result<(), String> {
        Err("git integration not configured".to_string())
    }
    async fn ensure_repo(&self, _clone_url: &str, _target_path: &str) -> Result<(), String> {
        Err("git integration not configured".to_string())
    }
    async fn git_status(&self, _repo: &str) -> Result<Value, String> {
        Err("git integration not configured".to_string())
    }
}
