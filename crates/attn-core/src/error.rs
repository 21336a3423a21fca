use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("db error: {0}")]
    Db(#[from] tokio_rusqlite::Error),

    #[error("store connection closed")]
    ConnectionClosed,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("pr not found: {0}")]
    PrNotFound(String),

    #[error("stale write rejected for {0}: a newer update already applied")]
    StaleWrite(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LockfileError {
    #[error("io error on lockfile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("another daemon instance already holds the lock (pid {0})")]
    AlreadyLocked(i32),
}
