//! Logging init: stderr subscriber with env-filter override.

use tracing_subscriber::EnvFilter;

/// Initialize logging to stderr. The embedding agent usually installs its own
/// subscriber; this is for binaries and tests that run the client standalone.
pub fn init_logging_stderr() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ota_http=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
