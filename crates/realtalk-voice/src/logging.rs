//! Tracing subscriber setup shared by binaries, demos and tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global subscriber filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
