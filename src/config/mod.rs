//! Advisor Configuration Module
//!
//! Provides deployment configuration loaded from TOML files: where model
//! bundles live, smoothing window size, session lifecycle and server settings.
//!
//! ## Loading Order
//!
//! 1. `BANDWISE_CONFIG` environment variable (path to TOML file)
//! 2. `bandwise.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! // In main():
//! config::init(AdvisorConfig::load());
//!
//! // Anywhere in the codebase:
//! let window = config::get().reasoning.smoothing_window;
//! ```

mod advisor_config;
pub mod defaults;
pub mod validation;
pub mod watcher;

pub use advisor_config::*;

use std::sync::OnceLock;

/// Global advisor configuration, initialized once at startup.
static ADVISOR_CONFIG: OnceLock<AdvisorConfig> = OnceLock::new();

/// Initialize the global advisor configuration.
///
/// Only the first call takes effect; later calls are logged and ignored.
pub fn init(config: AdvisorConfig) {
    if ADVISOR_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Get a reference to the global advisor configuration.
///
/// Panics if `init()` has not been called. A missing config is a fatal
/// startup error, not a recoverable condition.
pub fn get() -> &'static AdvisorConfig {
    ADVISOR_CONFIG
        .get()
        .expect("config::get() called before config::init(), this is a startup bug")
}

/// Check whether the config has been initialized.
pub fn is_initialized() -> bool {
    ADVISOR_CONFIG.get().is_some()
}
