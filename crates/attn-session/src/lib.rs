pub mod core;
pub mod error;
pub mod events;
pub mod ports;
pub mod recovery;

pub use crate::core::SessionCore;
pub use error::{Result, SessionError};
pub use events::{EventSink, NullSink, SessionEvent};
pub use ports::{ClassifyError, ExtractedTurn, TranscriptClassifier, TranscriptExtractor};
pub use recovery::{reconcile_startup, spawn_deferred_reconciler, RecoveryOutcome};
