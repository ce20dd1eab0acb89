//! Shared helpers for integration tests.

/// Install a tracing subscriber once so crate logs show up in test
/// output when `RUST_LOG` is set. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
