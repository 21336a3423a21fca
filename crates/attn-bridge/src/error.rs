use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Session(#[from] attn_session::SessionError),

    #[error(transparent)]
    Store(#[from] attn_core::StoreError),

    #[error(transparent)]
    Pty(#[from] attn_pty::PtyError),

    #[error(transparent)]
    GitHub(#[from] attn_github::GitHubError),

    #[error("unknown command")]
    UnknownCommand,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("daemon is still recovering from restart")]
    Recovering,

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Wire-level error code, stable across renames of the underlying
    /// Rust error type since clients match on this string.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::Session(_) => "session_error",
            BridgeError::Store(_) => "store_error",
            BridgeError::Pty(_) => "pty_error",
            BridgeError::GitHub(_) => "github_error",
            BridgeError::UnknownCommand => "unknown command",
            BridgeError::InvalidRequest(_) => "invalid_request",
            BridgeError::Recovering => "daemon_recovering",
            BridgeError::Unsupported(_) => "unsupported",
            BridgeError::Io(_) => "io_error",
        }
    }
}
