use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("store error: {0}")]
    Store(#[from] attn_core::StoreError),

    #[error("pty error: {0}")]
    Pty(#[from] attn_pty::PtyError),

    #[error("no new assistant turn")]
    NoNewAssistantTurn,

    #[error("invalid request: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
