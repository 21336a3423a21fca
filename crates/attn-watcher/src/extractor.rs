//! One-off "last assistant turn" extraction used by the `stop` hook
//! handler, as opposed to the continuous tailers used for classifier
//! triggering. Reads the whole transcript since a `stop` call is rare
//! relative to the 500 ms polling cadence and always wants the true
//! tail, not whatever offset a live tailer happens to be parked at.

use async_trait::async_trait;

use attn_session::{ExtractedTurn, TranscriptExtractor};

use crate::json_turn::parse_assistant_turn;

pub struct FileTranscriptExtractor;

#[async_trait]
impl TranscriptExtractor for FileTranscriptExtractor {
    async fn extract_last_assistant_turn(&self, _session_id: &str, transcript_path: &str) -> Option<ExtractedTurn> {
        let contents = tokio::fs::read_to_string(transcript_path).await.ok()?;
        contents.lines().rev().find_map(parse_assistant_turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_last_assistant_turn_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.jsonl");
        tokio::fs::write(
            &path,
            concat!(
                r#"{"type":"assistant","uuid":"u1","message":{"content":[{"type":"text","text":"first"}]}}"#,
                "\n",
                r#"{"type":"user","uuid":"u2"}"#,
                "\n",
                r#"{"type":"assistant","uuid":"u3","message":{"content":[{"type":"text","text":"last"}]}}"#,
                "\n",
            ),
        )
        .await
        .unwrap();

        let extractor = FileTranscriptExtractor;
        let turn = extractor.extract_last_assistant_turn("s1", path.to_str().unwrap()).await.unwrap();
        assert_eq!(turn.turn_uuid, "u3");
        assert_eq!(turn.text, "last");
    }

    #[tokio::test]
    async fn returns_none_for_missing_file() {
        let extractor = FileTranscriptExtractor;
        assert!(extractor.extract_last_assistant_turn("s1", "/nonexistent").await.is_none());
    }
}
