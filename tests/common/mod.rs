//! Shared test setup: human-readable `tracing` output, filterable via
//! `RUST_LOG`, so a failing integration test can be re-run with logging on.

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
