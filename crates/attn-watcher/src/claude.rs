use chrono::{DateTime, Utc};

use attn_core::types::SessionState;
use attn_session::ExtractedTurn;

use crate::json_turn::parse_assistant_turn;
use crate::signal::WatcherSignal;

/// Claude's trigger rule: classify the latest assistant turn once the
/// PTY has been quiet for the configured window and either the last
/// hook is stale or the session's current state is outside
/// `{working, pending_approval}`.
pub struct ClaudeProcessor {
    pending_turn: Option<ExtractedTurn>,
}

impl ClaudeProcessor {
    pub fn new() -> Self {
        Self { pending_turn: None }
    }

    pub fn ingest(&mut self, lines: &[String]) {
        for line in lines {
            if let Some(turn) = parse_assistant_turn(line) {
                self.pending_turn = Some(turn);
            }
        }
    }

    pub fn tick(
        &mut self,
        quiet_since: Option<DateTime<Utc>>,
        quiet_window: chrono::Duration,
        now: DateTime<Utc>,
        hook_last_seen: DateTime<Utc>,
        hook_freshness: chrono::Duration,
        current_state: SessionState,
    ) -> Vec<WatcherSignal> {
        let Some(turn) = &self.pending_turn else {
            return Vec::new();
        };

        let quiet_ok = quiet_since.map(|since| now - since >= quiet_window).unwrap_or(false);
        if !quiet_ok {
            return Vec::new();
        }

        let hook_stale = now - hook_last_seen > hook_freshness;
        let state_outside = !matches!(current_state, SessionState::Working | SessionState::PendingApproval);
        if !(hook_stale || state_outside) {
            return Vec::new();
        }

        vec![WatcherSignal::Classify(self.pending_turn.take().unwrap())]
    }
}

impl Default for ClaudeProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_when_quiet_and_hook_stale() {
        let mut p = ClaudeProcessor::new();
        p.ingest(&[r#"{"type":"assistant","uuid":"u1","message":{"content":[{"type":"text","text":"hi"}]}}"#.to_string()]);
        let now = Utc::now();
        let signals = p.tick(
            Some(now - chrono::Duration::seconds(3)),
            chrono::Duration::milliseconds(1500),
            now,
            now - chrono::Duration::seconds(200),
            chrono::Duration::seconds(120),
            SessionState::Working,
        );
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn does_not_trigger_while_pty_busy() {
        let mut p = ClaudeProcessor::new();
        p.ingest(&[r#"{"type":"assistant","uuid":"u1","message":{"content":[{"type":"text","text":"hi"}]}}"#.to_string()]);
        let now = Utc::now();
        let signals = p.tick(
            Some(now),
            chrono::Duration::milliseconds(1500),
            now,
            now - chrono::Duration::seconds(200),
            chrono::Duration::seconds(120),
            SessionState::Working,
        );
        assert!(signals.is_empty());
    }

    #[test]
    fn does_not_trigger_when_hook_fresh_and_state_inside() {
        let mut p = ClaudeProcessor::new();
        p.ingest(&[r#"{"type":"assistant","uuid":"u1","message":{"content":[{"type":"text","text":"hi"}]}}"#.to_string()]);
        let now = Utc::now();
        let signals = p.tick(
            Some(now - chrono::Duration::seconds(3)),
            chrono::Duration::milliseconds(1500),
            now,
            now - chrono::Duration::seconds(10),
            chrono::Duration::seconds(120),
            SessionState::Working,
        );
        assert!(signals.is_empty());
    }
}
