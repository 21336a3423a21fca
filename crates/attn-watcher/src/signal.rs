use attn_core::types::SessionState;
use attn_session::ExtractedTurn;

/// What a per-agent processor wants the session core to do.
#[derive(Debug, Clone)]
pub enum WatcherSignal {
    /// Direct state promotion/demotion driven by transcript structure
    /// (turn boundaries, tool lifecycle) rather than LLM classification.
    ForceState(SessionState),
    /// A new assistant turn is ready for LLM classification, subject
    /// to the quiet-window / hook-freshness trigger gate.
    Classify(ExtractedTurn),
}
