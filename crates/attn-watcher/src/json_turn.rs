//! Shared line-oriented JSON turn parsing, used by both the Claude
//! processor and the one-off `stop`-hook extractor.

use attn_session::ExtractedTurn;
use serde_json::Value;

/// Parse one transcript line as an assistant turn, if it is one.
/// Tolerant of unknown fields and non-JSON lines (both return `None`
/// rather than an error — malformed lines are just skipped).
pub fn parse_assistant_turn(line: &str) -> Option<ExtractedTurn> {
    let value: Value = serde_json::from_str(line).ok()?;
    if value.get("type")?.as_str()? != "assistant" {
        return None;
    }
    let turn_uuid = value.get("uuid")?.as_str()?.to_string();
    let text = extract_text(value.get("message")?)?;
    Some(ExtractedTurn { turn_uuid, text })
}

fn extract_text(message: &Value) -> Option<String> {
    let content = message.get("content")?.as_array()?;
    let mut text = String::new();
    for block in content {
        if block.get("type").and_then(Value::as_str) == Some("text") {
            if let Some(t) = block.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(t);
            }
        }
    }
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_assistant_turn() {
        let line = r#"{"type":"assistant","uuid":"u1","message":{"content":[{"type":"text","text":"done"}]}}"#;
        let turn = parse_assistant_turn(line).unwrap();
        assert_eq!(turn.turn_uuid, "u1");
        assert_eq!(turn.text, "done");
    }

    #[test]
    fn ignores_non_assistant_lines() {
        let line = r#"{"type":"user","uuid":"u1"}"#;
        assert!(parse_assistant_turn(line).is_none());
    }

    #[test]
    fn ignores_malformed_json() {
        assert!(parse_assistant_turn("not json").is_none());
    }
}
