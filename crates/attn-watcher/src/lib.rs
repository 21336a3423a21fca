pub mod claude;
pub mod codex;
pub mod copilot;
pub mod error;
pub mod extractor;
pub mod json_turn;
pub mod signal;
pub mod supervisor;
pub mod tail;

pub use claude::ClaudeProcessor;
pub use codex::CodexProcessor;
pub use copilot::CopilotProcessor;
pub use error::{Result, WatcherError};
pub use extractor::FileTranscriptExtractor;
pub use signal::WatcherSignal;
pub use supervisor::WatcherSupervisor;
pub use tail::FileTailer;
