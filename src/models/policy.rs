//! Control policy: maps a state vector to a normalized action vector.
//!
//! The training jobs export the actor half of an actor-critic agent as a
//! plain dense network in JSON:
//!
//! ```text
//! { "input_dim": 5,
//!   "layers": [ { "weights": [[..], ..], "bias": [..], "activation": "tanh" }, .. ],
//!   "output_squash": "tanh" }
//! ```
//!
//! `weights` is row-major `[out][in]`. The forward pass is
//! `h = act(W h + b)` per layer, then the output squash.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{read_json, BundleError};

/// Result of one policy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyOutput {
    /// Normalized action, one entry per action feature
    Action(Vec<f64>),
    /// The state vector length does not match what the policy was trained on
    DimMismatch { expected: usize, actual: usize },
}

/// Interface for every policy implementation.
///
/// Implementations must be pure: same state, same output.
pub trait ControlPolicy: Send + Sync + std::fmt::Debug {
    /// State-vector length the policy was trained on.
    fn input_dim(&self) -> usize;

    /// Action-vector length.
    fn output_dim(&self) -> usize;

    /// Evaluate the policy deterministically.
    fn predict(&self, state: &[f64]) -> PolicyOutput;

    /// Short label for logs.
    fn describe(&self) -> String {
        format!("policy({} -> {})", self.input_dim(), self.output_dim())
    }
}

/// Per-layer nonlinearity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Tanh,
    Relu,
    #[default]
    Identity,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Tanh => x.tanh(),
            Self::Relu => x.max(0.0),
            Self::Identity => x,
        }
    }
}

/// How the final layer output is bounded to the normalized action range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSquash {
    /// Squashed Gaussian (SAC-style)
    Tanh,
    /// Hard clip to `[-1, 1]` (PPO/A2C deterministic mean)
    Clip,
    #[default]
    None,
}

impl OutputSquash {
    fn apply(self, x: f64) -> f64 {
        match self {
            Self::Tanh => x.tanh(),
            Self::Clip => x.clamp(-1.0, 1.0),
            Self::None => x,
        }
    }
}

/// One dense layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Row-major `[out][in]`
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn in_dim(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn out_dim(&self) -> usize {
        self.weights.len()
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| {
                let z: f64 = row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b;
                self.activation.apply(z)
            })
            .collect()
    }
}

/// Feed-forward actor network exported from training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorNetwork {
    pub input_dim: usize,
    pub layers: Vec<DenseLayer>,
    #[serde(default)]
    pub output_squash: OutputSquash,
}

impl ActorNetwork {
    /// Load and validate an exported actor.
    pub fn load(path: &Path) -> Result<Self, BundleError> {
        let net: Self = read_json(path)?;
        net.validate()?;
        Ok(net)
    }

    /// Check that consecutive layer shapes line up.
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.layers.is_empty() {
            return Err(BundleError::Invalid("actor network has no layers".into()));
        }
        let mut width = self.input_dim;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.out_dim() == 0 {
                return Err(BundleError::Invalid(format!("layer {i} has no outputs")));
            }
            if layer.bias.len() != layer.out_dim() {
                return Err(BundleError::Invalid(format!(
                    "layer {i}: {} bias entries for {} outputs",
                    layer.bias.len(),
                    layer.out_dim()
                )));
            }
            if layer.weights.iter().any(|row| row.len() != width) || layer.in_dim() != width {
                return Err(BundleError::Invalid(format!(
                    "layer {i}: expected {width} inputs per row"
                )));
            }
            let finite = layer
                .weights
                .iter()
                .flatten()
                .chain(&layer.bias)
                .all(|v| v.is_finite());
            if !finite {
                return Err(BundleError::Invalid(format!("layer {i} contains NaN or Inf")));
            }
            width = layer.out_dim();
        }
        Ok(())
    }
}

impl ControlPolicy for ActorNetwork {
    fn input_dim(&self) -> usize {
        self.input_dim
    }

    fn output_dim(&self) -> usize {
        self.layers.last().map_or(0, DenseLayer::out_dim)
    }

    fn predict(&self, state: &[f64]) -> PolicyOutput {
        if state.len() != self.input_dim {
            return PolicyOutput::DimMismatch {
                expected: self.input_dim,
                actual: state.len(),
            };
        }
        let mut h = state.to_vec();
        for layer in &self.layers {
            h = layer.forward(&h);
        }
        PolicyOutput::Action(h.into_iter().map(|x| self.output_squash.apply(x)).collect())
    }

    fn describe(&self) -> String {
        let widths: Vec<String> = std::iter::once(self.input_dim)
            .chain(self.layers.iter().map(DenseLayer::out_dim))
            .map(|w| w.to_string())
            .collect();
        format!("actor[{}]", widths.join("-"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(weights: Vec<Vec<f64>>, bias: Vec<f64>) -> DenseLayer {
        DenseLayer {
            weights,
            bias,
            activation: Activation::Identity,
        }
    }

    #[test]
    fn test_forward_identity_layer() {
        let net = ActorNetwork {
            input_dim: 2,
            layers: vec![linear(vec![vec![1.0, 2.0]], vec![0.5])],
            output_squash: OutputSquash::None,
        };
        assert_eq!(net.predict(&[1.0, 1.0]), PolicyOutput::Action(vec![3.5]));
    }

    #[test]
    fn test_relu_then_clip() {
        let net = ActorNetwork {
            input_dim: 1,
            layers: vec![
                DenseLayer {
                    weights: vec![vec![1.0], vec![-1.0]],
                    bias: vec![0.0, 0.0],
                    activation: Activation::Relu,
                },
                linear(vec![vec![2.0, 2.0]], vec![0.0]),
            ],
            output_squash: OutputSquash::Clip,
        };
        // relu(3)=3, relu(-3)=0 -> 6 -> clipped to 1
        assert_eq!(net.predict(&[3.0]), PolicyOutput::Action(vec![1.0]));
        assert_eq!(net.predict(&[-0.25]), PolicyOutput::Action(vec![0.5]));
    }

    #[test]
    fn test_dim_mismatch_is_reported_not_raised() {
        let net = ActorNetwork {
            input_dim: 3,
            layers: vec![linear(vec![vec![0.0; 3]], vec![0.0])],
            output_squash: OutputSquash::Tanh,
        };
        assert_eq!(
            net.predict(&[1.0, 2.0]),
            PolicyOutput::DimMismatch {
                expected: 3,
                actual: 2
            }
        );
    }

    #[test]
    fn test_validate_rejects_shape_break() {
        let net = ActorNetwork {
            input_dim: 2,
            layers: vec![
                linear(vec![vec![1.0, 1.0]; 4], vec![0.0; 4]),
                linear(vec![vec![1.0; 3]], vec![0.0]),
            ],
            output_squash: OutputSquash::None,
        };
        assert!(matches!(net.validate(), Err(BundleError::Invalid(_))));
    }

    #[test]
    fn test_parse_exported_json() {
        let json = r#"{
            "input_dim": 2,
            "layers": [
                {"weights": [[0.1, 0.2], [0.3, 0.4]], "bias": [0, 0], "activation": "tanh"},
                {"weights": [[1.0, -1.0]], "bias": [0.1]}
            ],
            "output_squash": "clip"
        }"#;
        let net: ActorNetwork = serde_json::from_str(json).expect("parse");
        net.validate().expect("valid shapes");
        assert_eq!(net.output_dim(), 1);
        assert_eq!(net.layers[1].activation, Activation::Identity);
        assert_eq!(net.describe(), "actor[2-2-1]");
    }
}
