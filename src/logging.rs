//! Log output setup.
//!
//! The library only emits `tracing` events. Binaries and test suites call
//! [`init`] to print them to stderr.

use crate::config::{ConfigKey, ResolveConfig};
use tracing_subscriber::{EnvFilter, fmt};

/// Filter applied when `REDISMS_DEBUG` is set.
pub const DEBUG_FILTER: &str = "redis_memory_server=debug";

/// Filter applied when neither `REDISMS_DEBUG` nor `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "warn";

/// Installs a stderr subscriber configured from the process-wide configuration.
///
/// Calling it again, or after another subscriber was installed, does nothing.
pub fn init() {
    init_with(&ResolveConfig::global());
}

/// Installs a stderr subscriber configured from `config`.
///
/// `DEBUG` enables debug output of this crate. Otherwise `RUST_LOG` applies.
pub fn init_with(config: &ResolveConfig) {
    let filter = if config.get_bool(ConfigKey::Debug) {
        EnvFilter::new(DEBUG_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    };

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Debug mode enabled");
    }
}
