//! Derives the transcript file each agent kind is expected to write
//! to, from its working directory and session id. `register` carries
//! no explicit transcript path, so the bridge has to know each CLI's
//! on-disk convention to hand the watcher supervisor something to
//! tail.

use attn_core::types::AgentKind;
use std::path::PathBuf;

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Claude Code writes one JSONL transcript per session under
/// `~/.claude/projects/<cwd with slashes replaced by dashes>/<uuid>.jsonl`.
fn claude_path(dir: &str, id: &str) -> PathBuf {
    let encoded = dir.trim_start_matches('/').replace('/', "-");
    home().join(".claude").join("projects").join(encoded).join(format!("{id}.jsonl"))
}

/// Codex CLI writes rollouts under `~/.codex/sessions/<id>.jsonl`.
fn codex_path(id: &str) -> PathBuf {
    home().join(".codex").join("sessions").join(format!("{id}.jsonl"))
}

/// Copilot CLI writes session logs under `~/.copilot/sessions/<id>.jsonl`.
fn copilot_path(id: &str) -> PathBuf {
    home().join(".copilot").join("sessions").join(format!("{id}.jsonl"))
}

/// `None` for [`AgentKind::Shell`], which has no structured transcript
/// to watch.
pub fn derive(agent: AgentKind, dir: &str, id: &str) -> Option<String> {
    let path = match agent {
        AgentKind::Claude => claude_path(dir, id),
        AgentKind::Codex => codex_path(id),
        AgentKind::Copilot => copilot_path(id),
        AgentKind::Shell => return None,
    };
    Some(path.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_has_no_transcript() {
        assert!(derive(AgentKind::Shell, "/home/user/proj", "abc").is_none());
    }

    #[test]
    fn claude_path_encodes_cwd() {
        let path = derive(AgentKind::Claude, "/home/user/proj", "abc").unwrap();
        assert!(path.ends_with("home-user-proj/abc.jsonl"));
    }

    #[test]
    fn codex_path_is_flat() {
        let path = derive(AgentKind::Codex, "/home/user/proj", "abc").unwrap();
        assert!(path.ends_with(".codex/sessions/abc.jsonl"));
    }
}
