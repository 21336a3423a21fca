//! Per-agent-kind spawn command construction.
//!
//! Grounded on `at-session::cli_adapter::{CliAdapter, ClaudeAdapter}`:
//! each supported CLI gets its own adapter that knows its binary name,
//! default arguments, and the environment variables it needs to run
//! unattended inside a PTY (no further interactive setup prompts).

use attn_core::types::AgentKind;

use crate::pool::SpawnRequest;

/// Describes how to launch one agent kind inside a PTY.
pub trait CliAdapter: Send + Sync {
    fn agent_kind(&self) -> AgentKind;

    /// The binary to exec, e.g. `"claude"`.
    fn command(&self) -> &str;

    /// Extra args appended after the command, before any caller-supplied
    /// resume/continue arguments.
    fn base_args(&self) -> Vec<String>;

    /// Environment variables layered over the inherited process
    /// environment so the CLI doesn't pause for first-run setup.
    fn env(&self, worktree: &str) -> Vec<(String, String)> {
        let _ = worktree;
        Vec::new()
    }

    fn build_spawn_request(&self, cwd: &str, cols: u16, rows: u16, resume_args: &[String]) -> SpawnRequest {
        let mut args = self.base_args();
        args.extend(resume_args.iter().cloned());
        SpawnRequest {
            cmd: self.command().to_string(),
            args,
            env: self.env(cwd),
            cwd: cwd.to_string(),
            cols,
            rows,
        }
    }
}

pub struct ClaudeAdapter;

impl CliAdapter for ClaudeAdapter {
    fn agent_kind(&self) -> AgentKind {
        AgentKind::Claude
    }

    fn command(&self) -> &str {
        "claude"
    }

    fn base_args(&self) -> Vec<String> {
        vec!["--dangerously-skip-permissions".to_string()]
    }

    fn env(&self, _worktree: &str) -> Vec<(String, String)> {
        vec![("CLAUDE_NONINTERACTIVE".to_string(), "1".to_string())]
    }
}

pub struct CodexAdapter;

impl CliAdapter for CodexAdapter {
    fn agent_kind(&self) -> AgentKind {
        AgentKind::Codex
    }

    fn command(&self) -> &str {
        "codex"
    }

    fn base_args(&self) -> Vec<String> {
        vec!["--full-auto".to_string()]
    }
}

pub struct CopilotAdapter {
    /// Tool names that require an interactive approval prompt even in
    /// auto mode; reconciled against the running session's todo state
    /// rather than blocked at spawn time.
    pub approval_gated_tools: Vec<String>,
}

impl CliAdapter for CopilotAdapter {
    fn agent_kind(&self) -> AgentKind {
        AgentKind::Copilot
    }

    fn command(&self) -> &str {
        "copilot"
    }

    fn base_args(&self) -> Vec<String> {
        vec!["--prompt".to_string()]
    }
}

pub struct ShellAdapter {
    pub shell: String,
}

impl CliAdapter for ShellAdapter {
    fn agent_kind(&self) -> AgentKind {
        AgentKind::Shell
    }

    fn command(&self) -> &str {
        &self.shell
    }

    fn base_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Resolve the adapter for an agent kind, applying config-driven
/// overrides (currently only Copilot's approval-gated tool list).
pub fn adapter_for(kind: AgentKind, copilot_approval_gated_tools: &[String], shell: &str) -> Box<dyn CliAdapter> {
    match kind {
        AgentKind::Claude => Box::new(ClaudeAdapter),
        AgentKind::Codex => Box::new(CodexAdapter),
        AgentKind::Copilot => Box::new(CopilotAdapter {
            approval_gated_tools: copilot_approval_gated_tools.to_vec(),
        }),
        AgentKind::Shell => Box::new(ShellAdapter { shell: shell.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_adapter_sets_noninteractive_env() {
        let adapter = ClaudeAdapter;
        let req = adapter.build_spawn_request("/tmp/repo", 80, 24, &[]);
        assert_eq!(req.cmd, "claude");
        assert!(req.env.iter().any(|(k, _)| k == "CLAUDE_NONINTERACTIVE"));
    }

    #[test]
    fn resume_args_appended_after_base_args() {
        let adapter = CodexAdapter;
        let req = adapter.build_spawn_request("/tmp/repo", 80, 24, &["--resume".to_string(), "abc".to_string()]);
        assert_eq!(req.args, vec!["--full-auto", "--resume", "abc"]);
    }

    #[test]
    fn adapter_for_resolves_all_kinds() {
        for kind in [AgentKind::Claude, AgentKind::Codex, AgentKind::Copilot, AgentKind::Shell] {
            let adapter = adapter_for(kind, &[], "/bin/bash");
            assert_eq!(adapter.agent_kind(), kind);
        }
    }
}
