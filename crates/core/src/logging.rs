//! Tracing subscriber setup for hosts embedding the core.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are ignored.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Same as [`init`] but writes through the test harness capture.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
