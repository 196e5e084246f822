//! Tracing setup and helpers for best-effort background work.

use tracing::Subscriber;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

/// Compose the subscriber: env-filter (RUST_LOG wins over the provided
/// default) plus a formatting layer.
pub fn get_subscriber(
    default_filter: String,
) -> impl Subscriber + Send + Sync {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
}

/// Register the subscriber globally and bridge `log` records into it.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set subscriber");
}

/// Record an error from a fire-and-forget task. Background failures are
/// logged and swallowed; they must never affect a caller's transaction.
pub fn log_error(e: anyhow::Error) {
    tracing::error!("{:#}", e);
}
