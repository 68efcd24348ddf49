//! Tracing setup helpers.
//!
//! The runtime emits structured [`tracing`] events throughout; this module
//! only wires up a reasonable default subscriber so binaries and tests do
//! not repeat the boilerplate. `RUST_LOG` overrides the default filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "warn,weft=info";

/// Install the global subscriber. Call once, early in `main`.
///
/// Later calls are ignored, so libraries embedding this crate can keep
/// their own subscriber.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
