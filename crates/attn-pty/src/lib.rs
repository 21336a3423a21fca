pub mod adapter;
pub mod attach;
pub mod backend;
pub mod error;
pub mod pool;

pub use adapter::{adapter_for, CliAdapter};
pub use attach::{AttachInfo, OutputBuffer, PtyEvent};
pub use backend::{EmbeddedBackend, PtyBackend, RecoveryReport, SpawnOptions, WorkerBackend};
pub use error::{PtyError, Result};
pub use pool::{PtyHandle, SpawnRequest};

/// Construct the backend selected by [`attn_core::config::PtyBackendKind`].
pub fn build_backend(
    kind: attn_core::config::PtyBackendKind,
    worker_binary: &str,
    copilot_approval_gated_tools: Vec<String>,
    shell: String,
) -> Box<dyn PtyBackend> {
    match kind {
        attn_core::config::PtyBackendKind::Embedded => {
            Box::new(EmbeddedBackend::new(copilot_approval_gated_tools, shell))
        }
        attn_core::config::PtyBackendKind::Worker => Box::new(WorkerBackend::new(worker_binary)),
    }
}
