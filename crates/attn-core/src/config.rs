use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level daemon configuration. Loaded from a TOML file under the
/// data directory and overlaid with a handful of recognized `ATTN_*`
/// environment variables; every section has sensible defaults so the
/// daemon runs with no config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub daemon: DaemonConfig,
    pub pr_refresh: PrRefreshConfig,
    pub session: SessionConfig,
    pub watcher: WatcherConfig,
    pub bridge: BridgeConfig,
    pub classifier: ClassifierConfig,
    pub github: GithubConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            daemon: DaemonConfig::default(),
            pr_refresh: PrRefreshConfig::default(),
            session: SessionConfig::default(),
            watcher: WatcherConfig::default(),
            bridge: BridgeConfig::default(),
            classifier: ClassifierConfig::default(),
            github: GithubConfig::default(),
        }
    }
}

/// One registered GitHub (or GitHub Enterprise) host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubHostConfig {
    pub host: String,
    pub base_url: Option<String>,
    pub token_env: String,
    pub login: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub hosts: Vec<GithubHostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub data_dir: Option<PathBuf>,
    pub log_json: bool,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { data_dir: None, log_json: false, log_level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub ws_port: u16,
    pub db_path: Option<PathBuf>,
    pub pty_backend: PtyBackendKind,
    pub pty_worker_binary: Option<PathBuf>,
    pub pty_skip_startup_probe: bool,
    pub shutdown_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            ws_port: 9849,
            db_path: None,
            pty_backend: PtyBackendKind::Worker,
            pty_worker_binary: None,
            pty_skip_startup_probe: false,
            shutdown_grace_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PtyBackendKind {
    Embedded,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrRefreshConfig {
    pub warm_every_n_cycles: u32,
    pub cold_every_n_cycles: u32,
    pub list_poll_secs: u64,
}

impl Default for PrRefreshConfig {
    fn default() -> Self {
        Self { warm_every_n_cycles: 2, cold_every_n_cycles: 10, list_poll_secs: 90 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub long_run_threshold_secs: u64,
    /// While a hook has touched `last_seen` within this window, the
    /// transcript watcher suppresses its own classification.
    pub hook_freshness_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { long_run_threshold_secs: 300, hook_freshness_secs: 120 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
    pub copilot_approval_gated_tools: Option<Vec<String>>,
    /// PTY must be quiet for this long before a new assistant turn is
    /// eligible for classification.
    pub quiet_window_ms: u64,
    /// How long a Copilot approval-gated tool may run before it is
    /// treated as a pending approval.
    pub copilot_approval_grace_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            copilot_approval_gated_tools: None,
            quiet_window_ms: 1500,
            copilot_approval_grace_ms: 1200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub timeout_secs: u64,
    pub model: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { max_retries: 3, base_backoff_ms: 250, timeout_secs: 30, model: "claude-haiku-4-20250514".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub allowed_origins: Option<Vec<String>>,
    pub keepalive_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { allowed_origins: None, keepalive_secs: 30 }
    }
}

impl Config {
    /// Load from the default config path, falling back to defaults if
    /// the file doesn't exist, then apply the recognized environment
    /// overlay.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut cfg = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        cfg.apply_env_overlay();
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(cfg)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".attn")
            .join("config.toml")
    }

    /// Overlay the subset of the environment the system recognizes.
    /// Unset or unparsable variables leave the existing value in place.
    pub fn apply_env_overlay(&mut self) {
        if let Ok(v) = std::env::var("ATTN_WS_PORT") {
            if let Ok(port) = v.parse() {
                self.daemon.ws_port = port;
            }
        }
        if let Ok(v) = std::env::var("ATTN_DB_PATH") {
            self.daemon.db_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ATTN_PTY_BACKEND") {
            self.daemon.pty_backend = match v.as_str() {
                "embedded" => PtyBackendKind::Embedded,
                _ => PtyBackendKind::Worker,
            };
        }
        if let Ok(v) = std::env::var("ATTN_PTY_WORKER_BINARY") {
            self.daemon.pty_worker_binary = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ATTN_PTY_SKIP_STARTUP_PROBE") {
            self.daemon.pty_skip_startup_probe = v == "1" || v.eq_ignore_ascii_case("true");
        }
        if let (Ok(url), Ok(host)) = (std::env::var("ATTN_MOCK_GH_URL"), std::env::var("ATTN_MOCK_GH_HOST")) {
            let token_env = "ATTN_MOCK_GH_TOKEN".to_string();
            self.github.hosts.retain(|h| h.host != host);
            self.github.hosts.push(GithubHostConfig {
                host: host.clone(),
                base_url: Some(url),
                token_env,
                login: host,
            });
        }
    }

    /// Resolve the data directory, honoring an explicit `general.data_dir`
    /// override before falling back to `~/.attn`.
    pub fn data_dir(&self) -> PathBuf {
        self.general
            .data_dir
            .clone()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".attn"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.daemon.db_path.clone().unwrap_or_else(|| self.data_dir().join("attn.db"))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.data_dir().join("attn.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir().join("attn.pid")
    }

    pub fn instance_id_path(&self) -> PathBuf {
        self.data_dir().join("daemon-id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.daemon.ws_port, 9849);
        assert_eq!(cfg.pr_refresh.warm_every_n_cycles, 2);
        assert_eq!(cfg.pr_refresh.cold_every_n_cycles, 10);
        assert_eq!(cfg.session.long_run_threshold_secs, 300);
    }

    #[test]
    fn load_from_missing_file_errors() {
        let err = Config::load_from(Path::new("/nonexistent/attn-config.toml"));
        assert!(err.is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = Config::default();
        let s = cfg.to_toml().unwrap();
        let parsed: Config = toml::from_str(&s).unwrap();
        assert_eq!(parsed.daemon.ws_port, cfg.daemon.ws_port);
    }

    #[test]
    fn derived_paths_live_under_data_dir() {
        let mut cfg = Config::default();
        cfg.general.data_dir = Some(PathBuf::from("/tmp/attn-test-data"));
        assert_eq!(cfg.socket_path(), PathBuf::from("/tmp/attn-test-data/attn.sock"));
        assert_eq!(cfg.pid_path(), PathBuf::from("/tmp/attn-test-data/attn.pid"));
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/attn-test-data/attn.db"));
    }
}
