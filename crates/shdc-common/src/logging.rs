//! Tracing subscriber setup shared by both binaries.

/// Install a global `tracing` subscriber.
///
/// `level` is an `EnvFilter` directive string (e.g. `"info"`,
/// `"shdc=debug,shdc_transport=trace"`); `RUST_LOG` overrides it if set.
pub fn init(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
