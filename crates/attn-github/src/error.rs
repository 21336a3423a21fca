use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitHubError {
    #[error("GitHub API error: {0}")]
    Api(#[from] octocrab::Error),

    #[error("missing token for host {0} — set {1} in the environment")]
    MissingToken(String, String),

    #[error("rate limited on {resource}, reset at {reset_at}")]
    RateLimited { resource: String, reset_at: chrono::DateTime<chrono::Utc> },

    #[error("unknown host: {0}")]
    UnknownHost(String),

    #[error("store error: {0}")]
    Store(#[from] attn_core::StoreError),
}

pub type Result<T> = std::result::Result<T, GitHubError>;
