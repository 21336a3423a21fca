//! Process-level composition root: singleton lock, unix-socket and
//! WebSocket lifecycle, the startup recovery barrier, and graceful
//! shutdown. Grounded on `at-daemon::daemon::Daemon`'s
//! struct-of-collaborators-created-at-`new`-torn-down-at-`stop` shape,
//! combined with `attn-core::lockfile` for the PID-file discipline and
//! `attn-harness::shutdown` for the drain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use attn_core::{Config, DaemonLockfile, Store};
use attn_github::{GitHubRegistry, PrScheduler};
use attn_harness::ShutdownSignal;
use attn_session::SessionCore;
use attn_watcher::WatcherSupervisor;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Owns every long-lived collaborator for one daemon run. Built once in
/// `main`, torn down in [`Daemon::shutdown`].
pub struct Daemon {
    pub config: Config,
    pub store: Arc<Store>,
    pub core: Arc<SessionCore>,
    pub backend: Arc<dyn attn_pty::PtyBackend>,
    pub watcher: Arc<WatcherSupervisor>,
    pub registry: Arc<GitHubRegistry>,
    pub pr_scheduler: Arc<PrScheduler>,
    pub dispatcher: Arc<attn_bridge::Dispatcher>,
    pub instance_id: attn_core::types::DaemonInstanceId,
    pub lockfile: Option<DaemonLockfile>,
    pub shutdown: ShutdownSignal,
}

impl Daemon {
    /// Binds the singleton lock, opens the store (falling back to an
    /// in-memory, degraded-persistence store on failure), and wires
    /// every crate's public constructor together. Does not yet bind a
    /// listener or start any background loop — see [`Self::run`].
    pub async fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.data_dir()).context("failed to create data directory")?;

        let lockfile = match DaemonLockfile::acquire(config.pid_path()) {
            Ok(lock) => Some(lock),
            Err(attn_core::LockfileError::AlreadyLocked(pid)) => {
                anyhow::bail!("attn daemon already running (pid={pid})");
            }
            Err(e) => return Err(e.into()),
        };

        let store = match Store::open(&config.db_path()).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                warn!(error = %e, "failed to open persistent store, falling back to in-memory store");
                let store = Store::open_in_memory().await.context("failed to open in-memory fallback store")?;
                let store = Arc::new(store);
                let _ = store
                    .add_warning(attn_core::types::Warning {
                        code: "persistence_degraded".to_string(),
                        message: format!("running with in-memory store after open failure: {e}"),
                    })
                    .await;
                store
            }
        };

        let instance_id = attn_core::instance_id::load_or_create(&config.instance_id_path())
            .context("failed to load or create daemon instance id")?;

        let shutdown = ShutdownSignal::new();
        let hub = Arc::new(attn_bridge::Hub::new());
        hub.begin_recovery();

        let sink = Arc::new(attn_bridge::HubEventSink(hub.clone()));
        let classifier = build_classifier(&config);
        let core = Arc::new(SessionCore::new(store.clone(), sink, classifier, config.clone()));

        let backend: Arc<dyn attn_pty::PtyBackend> = Arc::from(attn_pty::build_backend(
            config.daemon.pty_backend,
            config.daemon.pty_worker_binary.as_deref().and_then(|p| p.to_str()).unwrap_or("attn-pty-worker"),
            config.watcher.copilot_approval_gated_tools.clone().unwrap_or_else(|| vec!["bash".to_string(), "create".to_string()]),
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
        ));

        let watcher = Arc::new(WatcherSupervisor::new(core.clone(), backend.clone(), config.clone()));

        let registry = Arc::new(GitHubRegistry::new());
        for host in &config.github.hosts {
            let token = std::env::var(&host.token_env).unwrap_or_default();
            if token.is_empty() {
                warn!(host = %host.host, env = %host.token_env, "no token found for configured github host, skipping registration");
                continue;
            }
            match attn_github::GitHubHostClient::new(&host.host, &host.login, &token, host.base_url.as_deref()) {
                Ok(client) => registry.register(client),
                Err(e) => warn!(host = %host.host, error = %e, "failed to construct github client"),
            }
        }

        let pr_sink = Arc::new(attn_bridge::HubPrSink(hub.clone()));
        let pr_scheduler = Arc::new(PrScheduler::new(store.clone(), registry.clone(), pr_sink, config.pr_refresh.clone()));

        let dispatcher = Arc::new(attn_bridge::Dispatcher {
            store: store.clone(),
            core: core.clone(),
            watcher: watcher.clone(),
            backend: backend.clone(),
            pr_scheduler: pr_scheduler.clone(),
            git_ops: Arc::new(attn_bridge::UnconfiguredGitOps),
            hub,
            instance_id: instance_id.0.to_string(),
        });

        Ok(Self {
            config,
            store,
            core,
            backend,
            watcher,
            registry,
            pr_scheduler,
            dispatcher,
            instance_id,
            lockfile,
            shutdown,
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Startup recovery sweep: reconciles the store against the live
    /// PTY set, spawns the deferred reconciler for anything left
    /// undecided, and lifts the recovery barrier so queued WebSocket
    /// clients get their `initial_state` snapshot.
    async fn reconcile_and_lift_barrier(&self) {
        let cutoff = Utc::now();
        match attn_session::reconcile_startup(&self.store, self.backend.as_ref(), cutoff).await {
            Ok(outcome) => {
                info!(
                    recovered = outcome.recovered.len(),
                    removed = outcome.removed.len(),
                    idled = outcome.idled.len(),
                    deferred = outcome.deferred.len(),
                    unclaimed = outcome.unclaimed_live.len(),
                    "startup recovery reconciliation complete"
                );
                if !outcome.deferred.is_empty() {
                    attn_session::spawn_deferred_reconciler(self.store.clone(), self.backend.clone(), outcome.deferred);
                }
            }
            Err(e) => warn!(error = %e, "startup recovery reconciliation failed"),
        }
        self.dispatcher.lift_recovery_barrier().await;
    }

    fn router(&self) -> Router {
        let ws_state = attn_bridge::WsState { dispatcher: self.dispatcher.clone() };
        let health_state = attn_bridge::HealthState {
            store: self.store.clone(),
            core: self.core.clone(),
            hub: self.dispatcher.hub.clone(),
            instance_id: self.instance_id.0.to_string(),
            github_available: !self.registry.is_empty(),
        };

        Router::new()
            .route("/ws", get(attn_bridge::ws_upgrade).with_state(ws_state))
            .route("/health", get(attn_bridge::health_handler).with_state(health_state))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Runs every background loop (unix socket RPC, transcript
    /// watcher, PR scheduler, WebSocket/health server) until
    /// `shutdown` fires, then waits for each to confirm drain before
    /// releasing the singleton lock.
    pub async fn run(self) -> Result<()> {
        self.reconcile_and_lift_barrier().await;

        let socket_path = self.config.socket_path();
        // unix socket listener, PR scheduler, transcript watcher, and the
        // axum server's own graceful-shutdown future each confirm drain.
        let expected_subscribers = 4u64;

        let socket_dispatcher = self.dispatcher.clone();
        let socket_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = attn_bridge::run_unix_socket(&socket_path, socket_dispatcher, socket_shutdown).await {
                warn!(error = %e, "unix socket rpc listener exited with an error");
            }
        });
        tokio::spawn(self.pr_scheduler.clone().run(self.shutdown.clone()));
        tokio::spawn(self.watcher.clone().run(self.shutdown.clone()));

        let app = self.router();
        let addr = format!("127.0.0.1:{}", self.config.daemon.ws_port);
        let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind websocket listener on {addr}"))?;
        info!(%addr, "websocket/health listener bound");

        let server_shutdown = self.shutdown.clone();
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let mut rx = server_shutdown.subscribe();
            let _ = rx.recv().await;
            server_shutdown.confirm_drained();
        });

        let expected = expected_subscribers;
        let drain_shutdown = self.shutdown.clone();
        let mut drain_wait_rx = self.shutdown.subscribe();
        let grace = Duration::from_secs(self.config.daemon.shutdown_grace_secs);

        tokio::select! {
            result = server => {
                if let Err(e) = result {
                    warn!(error = %e, "websocket/health server exited with an error");
                }
            }
            _ = async move {
                let _ = drain_wait_rx.recv().await;
                let result = drain_shutdown.wait_for_drain(expected, grace).await;
                if !result.is_complete() {
                    warn!(?result, "graceful shutdown timed out waiting for background loops to drain");
                }
            } => {}
        }

        if let Some(lockfile) = self.lockfile {
            lockfile.release();
        }
        Ok(())
    }
}

fn build_classifier(config: &Config) -> Arc<dyn attn_session::TranscriptClassifier> {
    let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
    let provider: Arc<dyn attn_classifier::LlmProvider> = Arc::new(attn_classifier::AnthropicProvider::new(api_key));
    let llm_config = attn_classifier::LlmConfig {
        model: config.classifier.model.clone(),
        ..attn_classifier::LlmConfig::default()
    };
    Arc::new(attn_classifier::AnthropicClassifier::new(
        provider,
        llm_config,
        Duration::from_secs(config.classifier.timeout_secs),
    ))
}
