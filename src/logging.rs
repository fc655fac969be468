//! Tracing subscriber setup

use tracing_subscriber::{fmt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "earshot=info";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `earshot=info`)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
