//! Advisor Configuration - deployment settings as operator-tunable TOML values
//!
//! Each section implements `Default` with the values in `config::defaults`,
//! so a missing or empty `bandwise.toml` yields a working deployment that
//! looks for bundles under `./artifacts`.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for an advisor deployment.
///
/// Load with `AdvisorConfig::load()` which searches:
/// 1. `$BANDWISE_CONFIG` env var
/// 2. `./bandwise.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdvisorConfig {
    /// Where policy bundles and the simulator are read from
    #[serde(default)]
    pub bundles: BundlesConfig,

    /// Smoothing and attribution tuning
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Session lifecycle
    #[serde(default)]
    pub registry: RegistryConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Log output format
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AdvisorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$BANDWISE_CONFIG` environment variable
    /// 2. `./bandwise.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("BANDWISE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded advisor config from BANDWISE_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from BANDWISE_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "BANDWISE_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("bandwise.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded advisor config from ./bandwise.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./bandwise.toml, using defaults");
                }
            }
        }

        info!("No bandwise.toml found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })
    }

    /// Parse and validate a TOML document. Unknown keys are warned about, not rejected.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(contents)
            .map_err(|e| ConfigError::Parse(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate all settings for internal consistency.
    ///
    /// Rules:
    /// - Smoothing window and top-k must be at least 1
    /// - Watch and eviction intervals must be positive
    /// - Server address must parse as `HOST:PORT`
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.reasoning.smoothing_window == 0 {
            errors.push("reasoning.smoothing_window must be >= 1".to_string());
        }
        if self.reasoning.top_k == 0 {
            errors.push("reasoning.top_k must be >= 1".to_string());
        }
        if self.bundles.watch_interval_secs == 0 {
            errors.push("bundles.watch_interval_secs must be > 0".to_string());
        }
        if self.registry.eviction_interval_secs == 0 {
            errors.push("registry.eviction_interval_secs must be > 0".to_string());
        }
        if self.registry.session_idle_secs == 0 {
            errors.push("registry.session_idle_secs must be > 0".to_string());
        }
        if self.server.addr.parse::<SocketAddr>().is_err() {
            errors.push(format!(
                "server.addr = '{}' is not a valid HOST:PORT socket address",
                self.server.addr
            ));
        }
        if self.server.body_limit_bytes < 1024 {
            errors.push(format!(
                "server.body_limit_bytes = {} is too small (minimum 1024)",
                self.server.body_limit_bytes
            ));
        }
        if let Some(name) = &self.bundles.bundle {
            if name.trim().is_empty() || name.contains("..") {
                errors.push(format!("bundles.bundle = '{name}' is not a valid bundle name"));
            }
        }

        let (range_errors, range_warnings) = super::validation::validate_ranges(self);
        errors.extend(range_errors);
        for w in &range_warnings {
            warn!("{}", w);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Bundles
// ============================================================================

/// Model artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundlesConfig {
    /// Root directory containing training-run directories
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Fixed bundle name under `base_dir`; `None` means "latest run"
    #[serde(default)]
    pub bundle: Option<String>,

    /// Simulator directory; defaults to `<base_dir>/simulator`
    #[serde(default)]
    pub simulator_dir: Option<PathBuf>,

    /// Poll `base_dir` for newer runs and hot-swap them in
    #[serde(default = "default_true")]
    pub watch: bool,

    /// Seconds between bundle watcher polls
    #[serde(default = "default_watch_interval_secs")]
    pub watch_interval_secs: u64,
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(defaults::BUNDLE_BASE_DIR)
}
fn default_true() -> bool {
    true
}
fn default_watch_interval_secs() -> u64 {
    defaults::BUNDLE_WATCH_INTERVAL_SECS
}

impl BundlesConfig {
    /// Effective simulator directory.
    pub fn simulator_path(&self) -> PathBuf {
        self.simulator_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join(defaults::SIMULATOR_SUBDIR))
    }
}

impl Default for BundlesConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            bundle: None,
            simulator_dir: None,
            watch: true,
            watch_interval_secs: default_watch_interval_secs(),
        }
    }
}

// ============================================================================
// Reasoning
// ============================================================================

/// Per-session reasoning tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Rolling window length for action and attribution smoothing
    #[serde(default = "default_smoothing_window")]
    pub smoothing_window: usize,

    /// Attribution entries reported per recommendation
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_smoothing_window() -> usize {
    defaults::SMOOTHING_WINDOW
}
fn default_top_k() -> usize {
    defaults::ATTRIBUTION_TOP_K
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            smoothing_window: default_smoothing_window(),
            top_k: default_top_k(),
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Evict sessions idle for longer than this (seconds)
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,

    /// Seconds between idle sweeps
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,
}

fn default_session_idle_secs() -> u64 {
    defaults::SESSION_IDLE_SECS
}
fn default_eviction_interval_secs() -> u64 {
    defaults::SESSION_EVICTION_INTERVAL_SECS
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_idle_secs: default_session_idle_secs(),
            eviction_interval_secs: default_eviction_interval_secs(),
        }
    }
}

// ============================================================================
// Server Config
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server bind address.
    ///
    /// Can be overridden by `BANDWISE_SERVER_ADDR` env var or `--addr` CLI flag.
    #[serde(default = "default_server_addr")]
    pub addr: String,

    /// Maximum request body size in bytes
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_server_addr() -> String {
    defaults::SERVER_ADDR.to_string()
}
fn default_body_limit() -> usize {
    defaults::BODY_LIMIT_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Log output settings. Level filtering stays with `RUST_LOG`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable logs
    #[serde(default)]
    pub json: bool,
}

// ============================================================================
// Tests
// ============================================================================
