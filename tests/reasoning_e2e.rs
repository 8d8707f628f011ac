//! Reasoning End-to-End Tests
//!
//! Full advice pipeline over bundles loaded from disk: dead band, scaling,
//! smoothing, simulator verification, attribution and degradation paths.

mod common;

use std::sync::Arc;

use bandwise::reasoning::diagnosis;
use bandwise::reasoning::{ModelGeneration, ReasoningError, ReasoningSession};
use bandwise::types::{AdviceStatus, Degradation, FeatureComponent, ReasoningOutcome};
use common::*;
use serde_json::json;

fn session_for(artifacts: &Artifacts, with_simulator: bool, window: usize) -> ReasoningSession {
    let simulator = with_simulator.then_some(artifacts.simulator_dir.as_path());
    let generation = ModelGeneration::load(&artifacts.bundle_dir, simulator).expect("generation loads");
    ReasoningSession::with_generation(Arc::new(generation), window, 3)
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn in_band_measurement_holds_with_zero_delta() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);

    let result = session.reasoned_advice(&full_row(1.0), 3.0).expect("advice");
    assert_eq!(result.status, AdviceStatus::Hold);
    assert_eq!(result.outcome, ReasoningOutcome::Advised);
    assert_eq!(result.delta_raw, vec![0.0, 0.0]);
    assert_eq!(result.suggested_action_values, result.current_action_values);
    assert_eq!(result.improvement, None);
    assert_eq!(result.diagnosis, diagnosis::WITHIN_BAND);
    // The simulator still runs inside the band
    assert_eq!(result.predicted_next, Some(PREDICT_HIGH));
}

#[test]
fn band_edges_are_inside() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);
    for y in [2.0, 4.0] {
        let result = session.reasoned_advice(&full_row(0.0), y).expect("advice");
        assert_eq!(result.status, AdviceStatus::Hold, "y = {y}");
    }
}

#[test]
fn out_of_band_delta_is_policy_output_times_std() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);

    let result = session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    let expected: Vec<f64> = POLICY_OUTPUT
        .iter()
        .zip(ACTION_STDS)
        .map(|(a, s)| a * s)
        .collect();
    assert_eq!(result.delta_raw.len(), 2);
    for (got, want) in result.delta_raw.iter().zip(&expected) {
        assert!(approx_eq(*got, *want), "{got} != {want}");
    }
    assert!(approx_eq(result.suggested_action_values[0], 10.0 + expected[0]));
    assert!(approx_eq(result.suggested_action_values[1], 1.0 + expected[1]));
    assert_eq!(result.action_features, vec!["speed".to_string(), "feed".to_string()]);
    assert_eq!(result.current_action_values, vec![10.0, 1.0]);
}

#[test]
fn verified_improvement_is_move() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);

    let result = session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    assert_eq!(result.status, AdviceStatus::Move);
    assert_eq!(result.predicted_next, Some(PREDICT_LOW));
    let improvement = result.improvement.expect("checked move");
    assert!(approx_eq(improvement, 2.0 - (PREDICT_LOW - 3.0).abs()));
    assert!(result.diagnosis.starts_with("adjustment proposed: y expected to move from 5.000"));
    assert!(!result.is_degraded());
}

#[test]
fn predicted_worsening_is_conflict() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);

    let result = session.reasoned_advice(&full_row(1.0), 5.0).expect("advice");
    assert_eq!(result.status, AdviceStatus::Conflict);
    assert!(approx_eq(result.improvement.expect("checked"), -1.0));
    assert_eq!(result.diagnosis, diagnosis::CONFLICT);
    // The proposed values are still reported
    assert_eq!(result.suggested_action_values.len(), 2);
}

// ============================================================================
// Attribution
// ============================================================================

#[test]
fn attribution_names_the_driving_feature() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);

    let result = session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    assert_eq!(result.top_attribution.len(), 3);
    assert_eq!(result.top_attribution[0], "valve (DOWN 1.400)");
    assert_eq!(result.top_attribution_smoothed[0], "valve (DOWN 1.400)");

    // Over one low and one high reading the averaged contributions cancel
    let result = session.reasoned_advice(&full_row(1.0), 5.0).expect("advice");
    assert_eq!(result.top_attribution[0], "valve (UP 1.400)");
    assert!(result
        .top_attribution_smoothed
        .iter()
        .all(|entry| entry.ends_with(" 0.000)")));
}

#[test]
fn zero_cover_simulator_degrades_attribution_only() {
    let artifacts = Artifacts::new("run_20240101_120000");
    write_json(
        &artifacts.simulator_dir.join("simulator_model.json"),
        &json!({"base_score": 0.0, "trees": [{"nodes": [
            {"feature": 2, "threshold": 0.5, "left": 1, "right": 2},
            {"leaf": PREDICT_LOW},
            {"leaf": PREDICT_HIGH}
        ]}]}),
    );
    let mut session = session_for(&artifacts, true, 10);

    let result = session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    assert_eq!(result.predicted_next, Some(PREDICT_LOW));
    assert_eq!(result.status, AdviceStatus::Move);
    assert!(result.top_attribution.is_empty());
    assert!(result.top_attribution_smoothed.is_empty());
    assert_eq!(result.degradations, vec![Degradation::AttributionFailed]);
}

// ============================================================================
// Degradation and errors
// ============================================================================

#[test]
fn missing_policy_feature_is_an_error() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);
    let mut row = full_row(0.0);
    row.0.remove("feed");

    let err = session.reasoned_advice(&row, 5.0).expect_err("feed is required");
    let ReasoningError::MissingFeature(missing) = err;
    assert_eq!(missing.feature, "feed");
    assert_eq!(missing.component, FeatureComponent::Action);
    // Nothing was pushed
    assert_eq!(session.buffer_lens(), (0, 0));
}

#[test]
fn missing_simulator_feature_is_unverified_move() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);
    let mut row = full_row(0.0);
    row.0.remove("valve");

    let result = session.reasoned_advice(&row, 5.0).expect("simulator input is optional");
    assert_eq!(result.predicted_next, None);
    assert_eq!(result.status, AdviceStatus::Move);
    assert_eq!(result.improvement, None);
    assert_eq!(result.diagnosis, diagnosis::UNVERIFIED);
    assert!(result.top_attribution.is_empty());
    assert_eq!(result.degradations, vec![Degradation::SimulatorUnavailable]);
}

#[test]
fn policy_without_simulator_still_advises() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, false, 10);

    let result = session.reasoned_advice(&full_row(0.0), 1.0).expect("advice");
    assert_eq!(result.status, AdviceStatus::Move);
    assert_eq!(result.predicted_next, None);
    assert!(result.top_attribution.is_empty());
    assert_eq!(result.degradations, vec![Degradation::SimulatorUnavailable]);
}

#[test]
fn state_width_mismatch_holds_with_diagnostic() {
    let artifacts = Artifacts::new("run_20240101_120000");
    write_json(&artifacts.bundle_dir.join(ACTOR_FILE), &constant_actor(6, &POLICY_OUTPUT));
    let mut session = session_for(&artifacts, true, 10);

    let result = session.reasoned_advice(&full_row(0.0), 5.0).expect("mismatch is not an error");
    assert_eq!(result.status, AdviceStatus::Hold);
    assert_eq!(
        result.outcome,
        ReasoningOutcome::DimMismatch {
            expected: 6,
            actual: 4
        }
    );
    assert_eq!(result.diagnosis, diagnosis::dim_mismatch(6, 4));
    assert!(result.delta_raw.is_empty());
    assert_eq!(session.buffer_lens(), (0, 0));
}

#[test]
fn session_without_generation_is_not_ready() {
    let mut session = ReasoningSession::new(10, 3);
    let result = session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    assert_eq!(result.status, AdviceStatus::Hold);
    assert_eq!(result.outcome, ReasoningOutcome::NotReady);
    assert_eq!(result.diagnosis, diagnosis::NOT_READY);
    assert_eq!(result.generation, None);
}

// ============================================================================
// Smoothing and reload
// ============================================================================

#[test]
fn constant_delta_smooths_to_itself_then_decays_in_band() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);

    let mut last = None;
    for _ in 0..3 {
        last = Some(session.reasoned_advice(&full_row(0.0), 5.0).expect("advice"));
    }
    let last = last.expect("ran");
    for (s, r) in last.delta_smoothed.iter().zip(&last.delta_raw) {
        assert!(approx_eq(*s, *r));
    }

    // An in-band reading pushes zeros: mean of three deltas and one zero
    let held = session.reasoned_advice(&full_row(0.0), 3.0).expect("advice");
    for (s, r) in held.delta_smoothed.iter().zip(&last.delta_raw) {
        assert!(approx_eq(*s, r * 0.75), "{s} vs {}", r * 0.75);
    }
    assert_eq!(session.buffer_lens(), (4, 4));
}

#[test]
fn window_bounds_buffer_length() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 2);
    for _ in 0..5 {
        session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    }
    assert_eq!(session.buffer_lens(), (2, 2));
    assert_eq!(session.summary().smoothing_window, 2);
}

#[test]
fn reload_clears_both_buffers_and_switches_generation() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);
    let first = session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    assert_eq!(session.buffer_lens(), (2, 2));

    let next = ModelGeneration::load(&artifacts.bundle_dir, Some(&artifacts.simulator_dir)).expect("loads");
    let next_id = next.id();
    let previous = session.reload(Arc::new(next)).expect("had a generation");
    assert_eq!(Some(previous.id()), first.generation);
    assert_eq!(session.buffer_lens(), (0, 0));

    let after = session.reasoned_advice(&full_row(0.0), 5.0).expect("advice");
    assert_eq!(after.generation, Some(next_id));
    assert_ne!(after.generation, first.generation);
}

#[test]
fn result_serializes_with_stable_field_names() {
    let artifacts = Artifacts::new("run_20240101_120000");
    let mut session = session_for(&artifacts, true, 10);
    let result = session.reasoned_advice(&full_row(1.0), 5.0).expect("advice");

    let v = serde_json::to_value(&result).expect("serialize");
    assert_eq!(v["status"], "CONFLICT");
    assert_eq!(v["outcome"]["kind"], "ADVISED");
    assert_eq!(v["predicted_next"], PREDICT_HIGH);
    assert!(v["suggested_action_values_smoothed"].is_array());
    assert!(v["timestamp"].is_string());
}
