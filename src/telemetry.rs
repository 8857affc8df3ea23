//! Tracing initialization. Safe to call more than once — later calls are
//! silently ignored.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber. `json=true` emits structured
/// JSON lines suitable for log aggregation; otherwise a compact
/// human-readable format is used. `level` is the default filter when
/// `RUST_LOG` is unset.
pub fn init_tracing(json: bool, level: tracing::Level) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if json {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init();
    }
}
