use tracing_subscriber::{fmt, EnvFilter};

/// Human-readable logging for interactive/dev use. Safe to call more than
/// once per process; later calls are no-ops.
pub fn init_logging(service_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .try_init();
    tracing::info!(service = service_name, "logging initialized");
}

/// Structured JSON logging, for production/daemon use where logs are
/// consumed by another process rather than a human terminal.
pub fn init_logging_json(service_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));
    let _ = fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .try_init();
    tracing::info!(service = service_name, "logging initialized (json)");
}
