use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("transcript not found: {0}")]
    NotFound(String),

    #[error("transcript I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session error: {0}")]
    Session(#[from] attn_session::SessionError),
}

pub type Result<T> = std::result::Result<T, WatcherError>;
