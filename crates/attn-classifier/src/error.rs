use thiserror::Error;

/// Error taxonomy for the classifier oracle, surfaced at the daemon's
/// error boundary (§7: transient backend errors are retried with a
/// bounded budget, never treated as fatal).
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse oracle response: {0}")]
    Parse(String),

    #[error("rate limited: retry after {retry_after_secs:?}s")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("oracle call timed out")]
    Timeout,

    #[error("circuit open, oracle calls suspended")]
    CircuitOpen,
}

impl From<reqwest::Error> for ClassifierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClassifierError::Timeout
        } else {
            ClassifierError::Http(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
