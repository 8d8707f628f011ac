//! Config validation: unknown-key detection with Levenshtein suggestions
//! and operating-range checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, "; did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for `AdvisorConfig`.
///
/// Maintained manually to match the struct hierarchy in advisor_config.rs.
/// Any new field added to `AdvisorConfig` must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        // [bundles]
        "bundles",
        "bundles.base_dir",
        "bundles.bundle",
        "bundles.simulator_dir",
        "bundles.watch",
        "bundles.watch_interval_secs",
        // [reasoning]
        "reasoning",
        "reasoning.smoothing_window",
        "reasoning.top_k",
        // [registry]
        "registry",
        "registry.session_idle_secs",
        "registry.eviction_interval_secs",
        // [server]
        "server",
        "server.addr",
        "server.body_limit_bytes",
        // [logging]
        "logging",
        "logging.json",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively collect every dotted key path present in a TOML value.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so suggestions are stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;
    for &k in known {
        let dist = levenshtein(unknown, k);
        if dist > 3 {
            continue;
        }
        best = match best {
            Some((bk, bd)) if bd < dist || (bd == dist && bk <= k) => Some((bk, bd)),
            _ => Some((k, dist)),
        };
    }
    best.map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Operating Range Validation
// ============================================================================

/// Validate operating ranges on a parsed `AdvisorConfig`.
///
/// Returns (errors, warnings). Errors are impossible values that must
/// prevent startup; warnings are suspicious but not fatal.
pub fn validate_ranges(config: &super::AdvisorConfig) -> (Vec<String>, Vec<ValidationWarning>) {
    let errors = Vec::new();
    let mut warnings = Vec::new();

    let window = config.reasoning.smoothing_window;
    if window > 1_000 {
        warnings.push(ValidationWarning {
            field: "reasoning.smoothing_window".to_string(),
            message: format!(
                "smoothing_window = {window} will damp recommendations for a very long time"
            ),
            suggestion: None,
        });
    }

    if config.reasoning.top_k > 20 {
        warnings.push(ValidationWarning {
            field: "reasoning.top_k".to_string(),
            message: format!(
                "top_k = {} produces attribution lists too long to read",
                config.reasoning.top_k
            ),
            suggestion: None,
        });
    }

    if config.registry.session_idle_secs < config.registry.eviction_interval_secs {
        warnings.push(ValidationWarning {
            field: "registry.session_idle_secs".to_string(),
            message: format!(
                "session_idle_secs = {} is shorter than eviction_interval_secs = {}; sessions will outlive their idle limit",
                config.registry.session_idle_secs, config.registry.eviction_interval_secs
            ),
            suggestion: None,
        });
    }

    (errors, warnings)
}

// ============================================================================
// Tests
// ============================================================================
