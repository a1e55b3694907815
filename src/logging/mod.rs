mod handler;
mod layer;
mod record;
mod store;

pub use handler::{HandlerStats, RemoteLogHandler, DIAGNOSTIC_TARGET};
pub use layer::RemoteLogLayer;
pub use record::LogRecord;
pub use store::{DocumentStore, JsonlFileStore, StoreError};

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;

pub const LOG_FILE_NAME: &str = "acdn.log";
pub const FALLBACK_FILE_NAME: &str = "remote_fallback.jsonl";

/// Keeps the logging pipeline alive. Call [`shutdown`](Self::shutdown)
/// before exit so buffered remote records are flushed.
pub struct LoggingGuard {
    remote: Arc<RemoteLogHandler>,
    _file_guard: WorkerGuard,
}

impl LoggingGuard {
    pub fn remote(&self) -> &RemoteLogHandler {
        &self.remote
    }

    pub async fn shutdown(self) {
        self.remote.shutdown().await;
    }
}

/// Install the global tracing subscriber.
///
/// Layers: compact stderr output, JSON lines in a daily rolling file under
/// `logs/`, and the remote handler when a store is supplied. `RUST_LOG`
/// takes precedence over `LOG_LEVEL`.
pub fn init_tracing(config: &Config, store: Option<Arc<dyn DocumentStore>>) -> Result<LoggingGuard> {
    std::fs::create_dir_all(&config.logs_dir)
        .with_context(|| format!("Failed to create {}", config.logs_dir.display()))?;

    let file_appender = tracing_appender::rolling::daily(&config.logs_dir, LOG_FILE_NAME);
    let (non_blocking, file_guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.log_level)));

    let fallback = config
        .remote_log
        .fallback_to_file
        .then(|| JsonlFileStore::new(config.logs_dir.join(FALLBACK_FILE_NAME)));
    let remote = Arc::new(RemoteLogHandler::start(
        store,
        config.remote_log.clone(),
        fallback,
    ));
    let remote_layer = remote
        .is_enabled()
        .then(|| RemoteLogLayer::new(remote.clone()));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .json(),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact(),
        )
        .with(remote_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard {
        remote,
        _file_guard: file_guard,
    })
}

/// Map a `LOG_LEVEL` value to a filter directive. Accepts the usual
/// aliases (`WARNING`, `CRITICAL`) and falls back to `info`.
pub fn default_directive(log_level: &str) -> String {
    let level = match log_level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        _ => "info",
    };
    format!("acdn={level},warn")
}
