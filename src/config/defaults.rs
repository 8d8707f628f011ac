//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery. Every value here can be
//! overridden from `bandwise.toml` unless noted otherwise.

// ============================================================================
// Bundles
// ============================================================================

/// Root directory scanned for training-run artifact directories.
pub const BUNDLE_BASE_DIR: &str = "./artifacts";

/// Simulator directory name under the bundle root when none is configured.
pub const SIMULATOR_SUBDIR: &str = "simulator";

/// How often the bundle watcher re-resolves the latest bundle (seconds).
pub const BUNDLE_WATCH_INTERVAL_SECS: u64 = 30;

// ============================================================================
// Reasoning
// ============================================================================

/// Rolling window length for action and attribution smoothing.
///
/// 10 readings at the typical 1 Hz sensor rate = 10 seconds of damping.
pub const SMOOTHING_WINDOW: usize = 10;

/// Number of attribution entries reported per recommendation.
pub const ATTRIBUTION_TOP_K: usize = 3;

// ============================================================================
// Session Registry
// ============================================================================

/// Sessions unused for this long are evicted (seconds). 3 600 = 1 hour.
pub const SESSION_IDLE_SECS: u64 = 3_600;

/// Interval between idle-session sweeps (seconds).
pub const SESSION_EVICTION_INTERVAL_SECS: u64 = 300;

// ============================================================================
// Server
// ============================================================================

/// Default HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:8080";

/// Maximum accepted request body (bytes). Feature rows are small.
pub const BODY_LIMIT_BYTES: usize = 1024 * 1024;

// ============================================================================
// Replay
// ============================================================================

/// Base delay denominator for the replay `--speed` flag.
///
/// `delay_ms = REPLAY_BASE_DELAY_MS / speed`
pub const REPLAY_BASE_DELAY_MS: u64 = 1_000;
