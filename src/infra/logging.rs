//! `tracing` sink setup: a stderr layer and a daily-rolling non-blocking
//! file layer, both governed by a shared `EnvFilter` (`RUST_LOG`).

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initializes the global tracing subscriber. The returned guard must be
/// held for the life of the process (`main` pulls it into its own stack
/// frame as `_worker_guard`) — once dropped, the non-blocking file writer
/// stops flushing.
pub fn configure_tracing(slot_name: &str) -> WorkerGuard {
    let file_appender =
        tracing_appender::rolling::daily("/var/log/bottledwater", format!("{slot_name}.log"));
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}
