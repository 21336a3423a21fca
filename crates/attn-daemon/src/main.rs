//! attn daemon — the single long-lived background process that owns
//! every agent session's PTY, reconciles its state across hooks/PTY
//! hints/transcript classification, tracks the user's open PRs, and
//! serves the bridge (unix socket RPC + WebSocket + `/health`) that
//! every companion UI talks to.

use anyhow::Result;
use attn_core::Config;
use tracing::info;

mod supervisor;

use supervisor::Daemon;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("failed to load config, using defaults: {e}");
        Config::default()
    });

    if config.general.log_json {
        attn_telemetry::init_logging_json("attn-daemon", &config.general.log_level);
    } else {
        attn_telemetry::init_logging("attn-daemon", &config.general.log_level);
    }

    info!(pid = std::process::id(), version = env!("CARGO_PKG_VERSION"), "attn daemon starting");

    let daemon = match Daemon::new(config).await {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("attn daemon failed to start: {e:#}");
            std::process::exit(1);
        }
    };

    let shutdown = daemon.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, initiating graceful shutdown");
            shutdown.trigger();
        }
    });

    #[cfg(unix)]
    {
        let shutdown = daemon.shutdown_handle();
        tokio::spawn(async move {
            let Ok(mut term) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) else { return };
            if term.recv().await.is_some() {
                info!("sigterm received, initiating graceful shutdown");
                shutdown.trigger();
            }
        });
    }

    daemon.run().await?;
    info!("attn daemon stopped");
    Ok(())
}
