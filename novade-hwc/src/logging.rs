//! Minimal logging setup for the hardware-composition backend.
//!
//! The full NovaDE logging stack lives with the host compositor; this module
//! only offers a fallback initializer for tests and early startup, built on
//! the `tracing` ecosystem.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static LOGGING: OnceCell<()> = OnceCell::new();

/// Initializes a minimal logging setup, directing messages to `stderr`.
///
/// Filters messages based on the `RUST_LOG` environment variable, defaulting
/// to "info" if it is unset or invalid. Errors during initialization (for
/// example, a global subscriber already being set by the host) are ignored.
pub fn init_minimal_logging() {
    LOGGING.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
