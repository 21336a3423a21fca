use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("pty session not found: {0}")]
    SessionNotFound(String),

    #[error("pty spawn failed: {0}")]
    SpawnFailed(String),

    #[error("pty I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pty internal error: {0}")]
    Internal(String),

    #[error("worker backend transport error: {0}")]
    WorkerTransport(String),

    #[error("recovery budget of {0:?} exceeded")]
    RecoveryTimeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, PtyError>;
