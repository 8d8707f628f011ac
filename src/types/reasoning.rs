//! Reasoning output types: AdviceStatus, ReasoningOutcome, Degradation, ReasoningResult

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviceStatus {
    /// Measurement is inside the band (or the engine could not reason); change nothing
    Hold,
    /// Adjustment proposed and not contradicted by the simulator
    Move,
    /// Simulator predicts the adjustment moves y further from the band center
    Conflict,
}

impl std::fmt::Display for AdviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hold => write!(f, "HOLD"),
            Self::Move => write!(f, "MOVE"),
            Self::Conflict => write!(f, "CONFLICT"),
        }
    }
}

/// Whether the pipeline ran to completion.
///
/// `NotReady` and `DimMismatch` always report `AdviceStatus::Hold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasoningOutcome {
    Advised,
    NotReady,
    DimMismatch { expected: usize, actual: usize },
}

/// Non-fatal problems encountered while producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Degradation {
    /// No simulator loaded, or the row lacked a simulator feature
    SimulatorUnavailable,
    /// TreeSHAP failed; attribution lists are empty
    AttributionFailed,
    /// A smoothing buffer saw a vector of a different length and restarted
    BufferReset,
}

/// One checked, explained recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResult {
    pub current_measurement: f64,
    /// Simulator forecast for the current (pre-move) row
    pub predicted_next: Option<f64>,
    pub current_action_values: Vec<f64>,
    pub delta_raw: Vec<f64>,
    pub delta_smoothed: Vec<f64>,
    /// `current + delta_raw`
    pub suggested_action_values: Vec<f64>,
    /// `current + delta_smoothed`
    pub suggested_action_values_smoothed: Vec<f64>,
    pub action_features: Vec<String>,
    pub top_attribution: Vec<String>,
    pub top_attribution_smoothed: Vec<String>,
    pub status: AdviceStatus,
    pub outcome: ReasoningOutcome,
    #[serde(default)]
    pub degradations: Vec<Degradation>,
    /// `|y - center| - |predicted - center|`, only when a move was checked
    pub improvement: Option<f64>,
    pub diagnosis: String,
    /// Id of the model generation that produced this result
    pub generation: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ReasoningResult {
    /// A HOLD result that carries no model output.
    pub fn hold(measurement: f64, outcome: ReasoningOutcome, diagnosis: String) -> Self {
        Self {
            current_measurement: measurement,
            predicted_next: None,
            current_action_values: Vec::new(),
            delta_raw: Vec::new(),
            delta_smoothed: Vec::new(),
            suggested_action_values: Vec::new(),
            suggested_action_values_smoothed: Vec::new(),
            action_features: Vec::new(),
            top_attribution: Vec::new(),
            top_attribution_smoothed: Vec::new(),
            status: AdviceStatus::Hold,
            outcome,
            degradations: Vec::new(),
            improvement: None,
            diagnosis,
            generation: None,
            timestamp: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degradations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&AdviceStatus::Conflict).expect("serialize");
        assert_eq!(json, "\"CONFLICT\"");
    }

    #[test]
    fn test_dim_mismatch_outcome_shape() {
        let json = serde_json::to_value(ReasoningOutcome::DimMismatch {
            expected: 5,
            actual: 4,
        })
        .expect("serialize");
        assert_eq!(json["kind"], "DIM_MISMATCH");
        assert_eq!(json["expected"], 5);
        assert_eq!(json["actual"], 4);
    }

    #[test]
    fn test_hold_constructor() {
        let r = ReasoningResult::hold(3.0, ReasoningOutcome::NotReady, "no model loaded".into());
        assert_eq!(r.status, AdviceStatus::Hold);
        assert!(r.predicted_next.is_none());
        assert!(!r.is_degraded());
    }
}
