//! Shared helpers for watchrun's integration tests: a one-shot tracing
//! subscriber plus config builders and a fake executor backend.

pub mod builders;
pub mod fake_executor;

use std::sync::Once;

use tracing_subscriber::{EnvFilter, fmt};

static TRACING: Once = Once::new();

/// Set up tracing once per test binary.
///
/// Respects `WATCHRUN_LOG` first and `RUST_LOG` second, defaulting to
/// `info`. Output goes through `with_test_writer()`, so the harness only
/// shows it for failing tests (or under `-- --nocapture`).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_env(watchrun::logging::LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}
