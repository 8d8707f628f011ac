//! Config Validation Tests
//!
//! Typo detection and range validation exercised through the public
//! config API, independently from the rest of the advisor.

use bandwise::config::validation::{
    known_config_keys, suggest_correction, validate_ranges, validate_unknown_keys,
};
use bandwise::config::{defaults, AdvisorConfig, ConfigError};

// ============================================================================
// Typo Detection
// ============================================================================

#[test]
fn typo_in_smoothing_window_warns_with_suggestion() {
    let toml_str = r#"
[reasoning]
smothing_window = 20
"#;
    let warnings = validate_unknown_keys(toml_str);
    assert_eq!(warnings.len(), 1, "Expected exactly 1 warning");
    assert!(warnings[0].field.contains("smothing_window"));
    let suggestion = warnings[0].suggestion.as_deref().expect("should suggest a correction");
    assert!(suggestion.contains("smoothing_window"));
    assert!(warnings[0].to_string().contains("did you mean"));
}

#[test]
fn typo_in_section_name_is_reported() {
    let warnings = validate_unknown_keys("[bundels]\nwatch = false\n");
    assert!(!warnings.is_empty());
    assert!(warnings
        .iter()
        .any(|w| w.suggestion.as_deref() == Some("bundles")));
}

#[test]
fn garbage_key_warns_without_suggestion() {
    let warnings = validate_unknown_keys("[server]\nqqqqqqqqqqqq = 1\n");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].suggestion.is_none());
}

#[test]
fn every_known_key_is_accepted() {
    let toml_str = r#"
[bundles]
base_dir = "/srv/models"
bundle = "run_20240101_120000"
simulator_dir = "/srv/models/sim"
watch = false
watch_interval_secs = 5

[reasoning]
smoothing_window = 5
top_k = 4

[registry]
session_idle_secs = 600
eviction_interval_secs = 60

[server]
addr = "127.0.0.1:9000"
body_limit_bytes = 4096

[logging]
json = true
"#;
    assert!(validate_unknown_keys(toml_str).is_empty());

    let config = AdvisorConfig::from_toml_str(toml_str).expect("valid config");
    assert_eq!(config.bundles.bundle.as_deref(), Some("run_20240101_120000"));
    assert!(!config.bundles.watch);
    assert_eq!(config.reasoning.smoothing_window, 5);
    assert_eq!(config.reasoning.top_k, 4);
    assert_eq!(config.server.addr, "127.0.0.1:9000");
    assert!(config.logging.json);
}

#[test]
fn known_keys_cover_every_section() {
    let keys = known_config_keys();
    for section in ["bundles", "reasoning", "registry", "server", "logging"] {
        assert!(keys.contains(section), "missing section {section}");
    }
    assert_eq!(
        suggest_correction("reasoning.top_kk", &keys).as_deref(),
        Some("reasoning.top_k")
    );
}

#[test]
fn unknown_keys_do_not_break_loading() {
    let config = AdvisorConfig::from_toml_str("[reasoning]\ntop_kay = 9\n").expect("still loads");
    assert_eq!(config.reasoning.top_k, defaults::ATTRIBUTION_TOP_K);
}

// ============================================================================
// Range Validation
// ============================================================================

#[test]
fn zero_window_and_top_k_are_errors() {
    let err = AdvisorConfig::from_toml_str("[reasoning]\nsmoothing_window = 0\ntop_k = 0\n")
        .expect_err("zero values are invalid");
    match err {
        ConfigError::Validation(errors) => {
            assert!(errors.iter().any(|e| e.contains("smoothing_window")));
            assert!(errors.iter().any(|e| e.contains("top_k")));
        }
        other => panic!("expected validation error, got {other}"),
    }
}

#[test]
fn unparseable_addr_is_an_error() {
    assert!(matches!(
        AdvisorConfig::from_toml_str("[server]\naddr = \"not an address\"\n"),
        Err(ConfigError::Validation(_))
    ));
}

#[test]
fn wrong_value_type_is_a_parse_error() {
    assert!(matches!(
        AdvisorConfig::from_toml_str("[reasoning]\nsmoothing_window = \"ten\"\n"),
        Err(ConfigError::Parse(..))
    ));
}

#[test]
fn suspicious_ranges_warn_but_load() {
    let toml_str = r#"
[reasoning]
smoothing_window = 5000
top_k = 50

[registry]
session_idle_secs = 10
eviction_interval_secs = 60
"#;
    let config = AdvisorConfig::from_toml_str(toml_str).expect("warnings are not fatal");
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert_eq!(warnings.len(), 3);
}

#[test]
fn defaults_are_clean() {
    let config = AdvisorConfig::default();
    assert!(config.validate().is_ok());
    let (errors, warnings) = validate_ranges(&config);
    assert!(errors.is_empty());
    assert!(warnings.is_empty());
    assert_eq!(config.reasoning.smoothing_window, defaults::SMOOTHING_WINDOW);
    assert_eq!(config.server.addr, defaults::SERVER_ADDR);
}

#[test]
fn config_file_round_trips() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let path = tmp.path().join("bandwise.toml");
    let mut config = AdvisorConfig::default();
    config.reasoning.smoothing_window = 7;
    config.bundles.bundle = Some("run_20240101_120000".into());
    std::fs::write(&path, config.to_toml().expect("serialize")).expect("write");

    let loaded = AdvisorConfig::load_from_file(&path).expect("load");
    assert_eq!(loaded.reasoning.smoothing_window, 7);
    assert_eq!(loaded.bundles.bundle.as_deref(), Some("run_20240101_120000"));
}
