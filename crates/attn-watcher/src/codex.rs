use chrono::{DateTime, Utc};
use serde_json::Value;

use attn_core::types::SessionState;
use attn_session::ExtractedTurn;

use crate::json_turn::parse_assistant_turn;
use crate::signal::WatcherSignal;

/// Codex tracks turn and tool lifecycle events rather than relying
/// purely on assistant-turn extraction; it can force `working` while a
/// turn is demonstrably still active, and promote to `waiting_input`
/// on a turn that ended without producing any assistant message.
pub struct CodexProcessor {
    turn_open: bool,
    pending_tools: u32,
    last_activity: Option<DateTime<Utc>>,
    observed_turn_start: bool,
    assistant_messages_this_turn: u32,
    pending_turn: Option<ExtractedTurn>,
}

impl CodexProcessor {
    pub fn new() -> Self {
        Self {
            turn_open: false,
            pending_tools: 0,
            last_activity: None,
            observed_turn_start: false,
            assistant_messages_this_turn: 0,
            pending_turn: None,
        }
    }

    pub fn ingest(&mut self, lines: &[String], now: DateTime<Utc>, current_state: SessionState) -> Vec<WatcherSignal> {
        let mut signals = Vec::new();
        for line in lines {
            let Ok(value) = serde_json::from_str::<Value>(line) else { continue };
            let Some(event_type) = value.get("type").and_then(Value::as_str) else { continue };

            match event_type {
                "turn_start" => {
                    self.turn_open = true;
                    self.observed_turn_start = true;
                    self.assistant_messages_this_turn = 0;
                    self.last_activity = Some(now);
                }
                "tool_start" => {
                    self.pending_tools += 1;
                    self.last_activity = Some(now);
                }
                "tool_complete" => {
                    self.pending_tools = self.pending_tools.saturating_sub(1);
                    self.last_activity = Some(now);
                }
                "activity" => {
                    self.last_activity = Some(now);
                }
                "assistant" => {
                    self.assistant_messages_this_turn += 1;
                    if let Some(turn) = parse_assistant_turn(line) {
                        self.pending_turn = Some(turn);
                    }
                }
                "turn_end" | "turn_aborted" => {
                    let zero_assistant_messages = self.assistant_messages_this_turn == 0;
                    self.turn_open = false;
                    if zero_assistant_messages
                        && self.observed_turn_start
                        && !matches!(current_state, SessionState::PendingApproval | SessionState::WaitingInput)
                    {
                        signals.push(WatcherSignal::ForceState(SessionState::WaitingInput));
                    }
                }
                _ => {}
            }
        }
        signals
    }

    /// Continuous check independent of new lines: while the turn is
    /// open, tools are pending, or activity was seen within the active
    /// window, the session is forced to `working`.
    pub fn tick(&self, now: DateTime<Utc>, active_window: chrono::Duration) -> Vec<WatcherSignal> {
        let recent_activity = self.last_activity.map(|t| now - t < active_window).unwrap_or(false);
        if self.turn_open || self.pending_tools > 0 || recent_activity {
            vec![WatcherSignal::ForceState(SessionState::Working)]
        } else {
            Vec::new()
        }
    }

    pub fn take_classification_candidate(
        &mut self,
        quiet_since: Option<DateTime<Utc>>,
        quiet_window: chrono::Duration,
        now: DateTime<Utc>,
        hook_last_seen: DateTime<Utc>,
        hook_freshness: chrono::Duration,
        current_state: SessionState,
    ) -> Option<WatcherSignal> {
        let turn = self.pending_turn.as_ref()?;
        let _ = turn;
        let quiet_ok = quiet_since.map(|since| now - since >= quiet_window).unwrap_or(false);
        if !quiet_ok {
            return None;
        }
        let hook_stale = now - hook_last_seen > hook_freshness;
        let state_outside = !matches!(current_state, SessionState::Working | SessionState::PendingApproval);
        if !(hook_stale || state_outside) {
            return None;
        }
        self.pending_turn.take().map(WatcherSignal::Classify)
    }
}

impl Default for CodexProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_end_with_zero_assistant_messages_forces_waiting_input() {
        let mut p = CodexProcessor::new();
        let now = Utc::now();
        p.ingest(&[r#"{"type":"turn_start"}"#.to_string()], now, SessionState::Working);
        let signals = p.ingest(&[r#"{"type":"turn_end"}"#.to_string()], now, SessionState::Working);
        assert!(matches!(signals.as_slice(), [WatcherSignal::ForceState(SessionState::WaitingInput)]));
    }

    #[test]
    fn turn_end_with_assistant_message_does_not_force() {
        let mut p = CodexProcessor::new();
        let now = Utc::now();
        p.ingest(&[r#"{"type":"turn_start"}"#.to_string()], now, SessionState::Working);
        p.ingest(
            &[r#"{"type":"assistant","uuid":"u1","message":{"content":[{"type":"text","text":"hi"}]}}"#.to_string()],
            now,
            SessionState::Working,
        );
        let signals = p.ingest(&[r#"{"type":"turn_end"}"#.to_string()], now, SessionState::Working);
        assert!(signals.is_empty());
    }

    #[test]
    fn tick_forces_working_while_tool_pending() {
        let mut p = CodexProcessor::new();
        let now = Utc::now();
        p.ingest(&[r#"{"type":"tool_start"}"#.to_string()], now, SessionState::Idle);
        let signals = p.tick(now, chrono::Duration::seconds(5));
        assert!(matches!(signals.as_slice(), [WatcherSignal::ForceState(SessionState::Working)]));
    }
}
