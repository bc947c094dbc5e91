use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "tower_quota=info,quota_limit=info,quota_server=info";

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the built-in filter. Calling this more
/// than once is harmless; later calls leave the first subscriber in place.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
