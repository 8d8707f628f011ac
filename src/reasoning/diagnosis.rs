//! Operator-facing diagnosis strings.

use crate::types::AdviceStatus;

pub const NOT_READY: &str = "no model loaded";
pub const WITHIN_BAND: &str = "within band, no action";
pub const UNVERIFIED: &str = "adjustment proposed, but outcome could not be verified";
pub const CONFLICT: &str = "model disagreement: proposed action shows no verified improvement";

pub fn dim_mismatch(expected: usize, actual: usize) -> String {
    format!(
        "policy expects {expected} state features but received {actual}; check that the bundle matches the live feature set"
    )
}

/// Decision table for an evaluated recommendation. First matching row wins.
pub fn describe(status: AdviceStatus, measurement: f64, predicted: Option<f64>) -> String {
    match (status, predicted) {
        (AdviceStatus::Hold, _) => WITHIN_BAND.to_string(),
        (_, None) => UNVERIFIED.to_string(),
        (AdviceStatus::Conflict, Some(_)) => CONFLICT.to_string(),
        (AdviceStatus::Move, Some(p)) => {
            format!("adjustment proposed: y expected to move from {measurement:.3} to {p:.3}")
        }
    }
}
