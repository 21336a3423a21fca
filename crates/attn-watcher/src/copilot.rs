use chrono::{DateTime, Utc};
use serde_json::Value;

use attn_core::types::SessionState;

use crate::signal::WatcherSignal;

/// Copilot's pending-approval inference: during an open turn, a tool
/// from the approval-gated set that has run longer than the grace
/// window without completing implies the user must approve it.
pub struct CopilotProcessor {
    turn_open: bool,
    approval_gated_tools: Vec<String>,
    /// name -> started_at, for gated tools currently running.
    running_gated_tools: Vec<(String, DateTime<Utc>)>,
}

impl CopilotProcessor {
    pub fn new(approval_gated_tools: Vec<String>) -> Self {
        Self { turn_open: false, approval_gated_tools, running_gated_tools: Vec::new() }
    }

    pub fn ingest(&mut self, lines: &[String], now: DateTime<Utc>) {
        for line in lines {
            let Ok(value) = serde_json::from_str::<Value>(line) else { continue };
            let Some(event_type) = value.get("type").and_then(Value::as_str) else { continue };

            match event_type {
                "assistant.turn_start" => {
                    self.turn_open = true;
                }
                "assistant.turn_end" => {
                    self.turn_open = false;
                    self.running_gated_tools.clear();
                }
                "tool_start" => {
                    if let Some(name) = value.get("tool").and_then(Value::as_str) {
                        if self.approval_gated_tools.iter().any(|t| t == name) {
                            self.running_gated_tools.push((name.to_string(), now));
                        }
                    }
                }
                "tool_complete" => {
                    if let Some(name) = value.get("tool").and_then(Value::as_str) {
                        self.running_gated_tools.retain(|(n, _)| n != name);
                    }
                }
                _ => {}
            }
        }
    }

    pub fn tick(&self, now: DateTime<Utc>, grace: chrono::Duration, current_state: SessionState) -> Vec<WatcherSignal> {
        if !self.turn_open {
            return Vec::new();
        }

        let pending_approval = self.running_gated_tools.iter().any(|(_, started)| now - *started > grace);

        if pending_approval {
            if matches!(
                current_state,
                SessionState::Idle | SessionState::WaitingInput | SessionState::Unknown | SessionState::Launching
            ) {
                return vec![WatcherSignal::ForceState(SessionState::PendingApproval)];
            }
        } else if current_state == SessionState::PendingApproval {
            return vec![WatcherSignal::ForceState(SessionState::Working)];
        }

        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gated_tool_past_grace_promotes_pending_approval() {
        let mut p = CopilotProcessor::new(vec!["bash".to_string(), "create".to_string()]);
        let now = Utc::now();
        p.ingest(&[r#"{"type":"assistant.turn_start"}"#.to_string()], now);
        p.ingest(&[r#"{"type":"tool_start","tool":"bash"}"#.to_string()], now - chrono::Duration::milliseconds(1300));
        let signals = p.tick(now, chrono::Duration::milliseconds(1200), SessionState::Idle);
        assert!(matches!(signals.as_slice(), [WatcherSignal::ForceState(SessionState::PendingApproval)]));
    }

    #[test]
    fn clearing_condition_demotes_to_working() {
        let mut p = CopilotProcessor::new(vec!["bash".to_string()]);
        let now = Utc::now();
        p.ingest(&[r#"{"type":"assistant.turn_start"}"#.to_string()], now);
        p.ingest(&[r#"{"type":"tool_start","tool":"bash"}"#.to_string()], now);
        p.ingest(&[r#"{"type":"tool_complete","tool":"bash"}"#.to_string()], now);
        let signals = p.tick(now, chrono::Duration::milliseconds(1200), SessionState::PendingApproval);
        assert!(matches!(signals.as_slice(), [WatcherSignal::ForceState(SessionState::Working)]));
    }

    #[test]
    fn non_gated_tool_does_not_trigger() {
        let mut p = CopilotProcessor::new(vec!["bash".to_string()]);
        let now = Utc::now();
        p.ingest(&[r#"{"type":"assistant.turn_start"}"#.to_string()], now);
        p.ingest(&[r#"{"type":"tool_start","tool":"read_file"}"#.to_string()], now - chrono::Duration::seconds(5));
        let signals = p.tick(now, chrono::Duration::milliseconds(1200), SessionState::Idle);
        assert!(signals.is_empty());
    }
}
