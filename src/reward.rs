//! Band reward contract
//!
//! The policies served here were trained against a distance-to-band reward
//! that is flat inside the band. The only action that cannot lose reward
//! there is `a = 0`, which is why the reasoning engine forces a zero delta
//! whenever the measurement is in band.
//!
//! Actions are trained in normalized units: raw setpoint deltas divided by
//! the standard deviation of historical deltas and clipped to `[-1, 1]`.
//! [`denormalize`] is the serving-side inverse (without the clip).

use crate::types::TargetBand;

/// Smallest band width used as a divisor, so a zero-width band still scores.
pub const MIN_BAND_WIDTH: f64 = 1e-9;

/// Reward for reaching `y_next` after taking the normalized action `action`.
///
/// `0` inside the band, `-distance / width` outside, minus
/// `action_penalty * ||action||²` in both cases.
pub fn band_reward(y_next: f64, band: &TargetBand, action: &[f64], action_penalty: f64) -> f64 {
    let effort: f64 = action.iter().map(|a| a * a).sum();
    let shaped = if band.contains(y_next) {
        0.0
    } else {
        -band.distance(y_next) / band.width().max(MIN_BAND_WIDTH)
    };
    shaped - action_penalty * effort
}

/// Training-time label: raw delta in native units → normalized action.
pub fn normalize_delta(raw: f64, std: f64) -> f64 {
    (raw / std).clamp(-1.0, 1.0)
}

/// Elementwise [`normalize_delta`]. Extra entries on either side are ignored.
pub fn normalize_deltas(raw: &[f64], stds: &[f64]) -> Vec<f64> {
    raw.iter()
        .zip(stds)
        .map(|(&r, &s)| normalize_delta(r, s))
        .collect()
}

/// Serving-time inverse: normalized action → delta in native units (unclipped).
pub fn denormalize(action: &[f64], stds: &[f64]) -> Vec<f64> {
    action.iter().zip(stds).map(|(a, s)| a * s).collect()
}
