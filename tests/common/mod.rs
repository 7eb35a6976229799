//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Once;

static INIT_LOGGING: Once = Once::new();

/// Initialize tracing-based test logging.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}
