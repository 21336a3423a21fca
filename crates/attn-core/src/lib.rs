pub mod config;
pub mod error;
pub mod instance_id;
pub mod lockfile;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, LockfileError, StoreError};
pub use lockfile::DaemonLockfile;
pub use store::Store;
