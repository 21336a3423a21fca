//! Narrow contracts the session core depends on but does not implement.
//!
//! The classifier and the transcript extractor are both implemented in
//! other crates (`attn-classifier`, `attn-watcher`) and wired in at the
//! composition root (`attn-daemon`) so neither has to depend on this
//! crate, and this crate never depends on either of them.

use async_trait::async_trait;

#[derive(Debug, Clone)]
pub enum ClassifyError {
    RateLimited { retry_after_secs: Option<u64> },
    Other(String),
}

#[async_trait]
pub trait TranscriptClassifier: Send + Sync {
    /// Classify a single assistant turn's text into a session-state
    /// label (`"working"`, `"waiting_input"`, `"pending_approval"`,
    /// `"idle"`, `"unknown"`, …).
    async fn classify(&self, text: &str) -> Result<String, ClassifyError>;
}

#[derive(Debug, Clone)]
pub struct ExtractedTurn {
    pub turn_uuid: String,
    pub text: String,
}

#[async_trait]
pub trait TranscriptExtractor: Send + Sync {
    async fn extract_last_assistant_turn(&self, session_id: &str, transcript_path: &str) -> Option<ExtractedTurn>;
}
