//! Outcome simulator: a gradient-boosted regression-tree ensemble that
//! predicts the next measurement from a full feature row.
//!
//! On disk the simulator directory holds the ensemble and its ordered
//! feature list. Older trainers used different file names, which are still
//! accepted as fallbacks.
//!
//! ```text
//! { "base_score": 0.5,
//!   "trees": [ { "nodes": [
//!       { "feature": 0, "threshold": 1.5, "left": 1, "right": 2, "missing_left": true, "cover": 100 },
//!       { "leaf": -0.2, "cover": 60 },
//!       { "leaf": 0.3, "cover": 40 } ] } ] }
//! ```
//!
//! Node 0 is the root. `x < threshold` goes left; NaN follows `missing_left`.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{first_existing, read_json, BundleError};
use crate::types::{FeatureComponent, FeatureRow, MissingFeature};

pub const MODEL_FILES: [&str; 2] = ["simulator_model.json", "xgb_model.json"];
pub const FEATURE_FILES: [&str; 2] = ["simulator_features.json", "feature_names.json"];

/// Ensembles at least this large are evaluated tree-parallel.
pub(crate) const PARALLEL_TREE_THRESHOLD: usize = 64;

// ============================================================================
// Trees
// ============================================================================

/// One tree node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default = "default_missing_left")]
        missing_left: bool,
        #[serde(default)]
        cover: f64,
    },
    Leaf {
        leaf: f64,
        #[serde(default)]
        cover: f64,
    },
}

fn default_missing_left() -> bool {
    true
}

impl Node {
    /// Training rows that reached this node (hessian sum for XGBoost).
    pub fn cover(&self) -> f64 {
        match self {
            Self::Split { cover, .. } | Self::Leaf { cover, .. } => *cover,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Child that `x` falls into at a split.
    pub(crate) fn route(x: f64, threshold: f64, left: usize, right: usize, missing_left: bool) -> usize {
        if x.is_nan() {
            if missing_left {
                left
            } else {
                right
            }
        } else if x < threshold {
            left
        } else {
            right
        }
    }

    /// Leaf value reached by `x`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { leaf, .. } => return *leaf,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    missing_left,
                    ..
                } => idx = Self::route(x[*feature], *threshold, *left, *right, *missing_left),
            }
        }
    }

    /// Longest root-to-leaf path, counted in splits.
    pub fn max_depth(&self) -> usize {
        fn depth(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + depth(nodes, *left).max(depth(nodes, *right)),
            }
        }
        depth(&self.nodes, 0)
    }

    /// Children must point forward and stay in range, which rules out cycles.
    fn validate(&self, t: usize, n_features: usize) -> Result<(), BundleError> {
        if self.nodes.is_empty() {
            return Err(BundleError::Invalid(format!("tree {t} has no nodes")));
        }
        let n = self.nodes.len();
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { leaf, .. } if !leaf.is_finite() => {
                    return Err(BundleError::Invalid(format!(
                        "tree {t} node {i}: non-finite leaf value"
                    )));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(BundleError::Invalid(format!(
                            "tree {t} node {i}: feature index {feature} out of range ({n_features} features)"
                        )));
                    }
                    if threshold.is_nan() {
                        return Err(BundleError::Invalid(format!(
                            "tree {t} node {i}: NaN threshold"
                        )));
                    }
                    for child in [*left, *right] {
                        if child <= i || child >= n {
                            return Err(BundleError::Invalid(format!(
                                "tree {t} node {i}: child index {child} is invalid"
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Ensemble
// ============================================================================

/// Sum-of-trees regression model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeEnsemble {
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn validate(&self, n_features: usize) -> Result<(), BundleError> {
        if !self.base_score.is_finite() {
            return Err(BundleError::Invalid("base_score must be finite".into()));
        }
        self.trees
            .iter()
            .enumerate()
            .try_for_each(|(t, tree)| tree.validate(t, n_features))
    }

    /// Raw ensemble output for a fixed-order feature vector.
    pub fn predict(&self, x: &[f64]) -> f64 {
        let sum: f64 = if self.trees.len() >= PARALLEL_TREE_THRESHOLD {
            self.trees.par_iter().map(|t| t.predict(x)).sum()
        } else {
            self.trees.iter().map(|t| t.predict(x)).sum()
        };
        self.base_score + sum
    }
}

// ============================================================================
// SimulatorBundle
// ============================================================================

/// A loaded ensemble and the feature order it was trained on.
#[derive(Debug, Clone)]
pub struct SimulatorBundle {
    ensemble: TreeEnsemble,
    feature_names: Vec<String>,
    dir: Option<PathBuf>,
}

impl SimulatorBundle {
    /// Load from a simulator directory, trying primary file names before legacy ones.
    pub fn load(dir: &Path) -> Result<Self, BundleError> {
        let model_path = first_existing(dir, &MODEL_FILES)?;
        let features_path = first_existing(dir, &FEATURE_FILES)?;

        let ensemble: TreeEnsemble = read_json(&model_path)?;
        let feature_names: Vec<String> = read_json(&features_path)?;
        debug!(
            model = %model_path.display(),
            features = feature_names.len(),
            trees = ensemble.trees.len(),
            "Parsed simulator"
        );

        let mut sim = Self::from_parts(ensemble, feature_names)?;
        sim.dir = Some(dir.to_path_buf());
        Ok(sim)
    }

    pub fn from_parts(ensemble: TreeEnsemble, feature_names: Vec<String>) -> Result<Self, BundleError> {
        if feature_names.is_empty() {
            return Err(BundleError::Invalid("simulator feature list is empty".into()));
        }
        ensemble.validate(feature_names.len())?;
        Ok(Self {
            ensemble,
            feature_names,
            dir: None,
        })
    }

    pub fn ensemble(&self) -> &TreeEnsemble {
        &self.ensemble
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Row values in training order. Any absent feature fails the whole vector.
    pub fn feature_vector(&self, row: &FeatureRow) -> Result<Vec<f64>, MissingFeature> {
        row.require_all(&self.feature_names, FeatureComponent::Simulator)
    }

    /// Predicted next measurement for the current row, or `None` when the
    /// row is incomplete or the ensemble output is not finite.
    pub fn predict_next(&self, row: &FeatureRow) -> Option<f64> {
        let x = match self.feature_vector(row) {
            Ok(x) => x,
            Err(e) => {
                debug!(feature = %e.feature, "Simulator input incomplete, prediction unavailable");
                return None;
            }
        };
        let y = self.ensemble.predict(&x);
        if y.is_finite() {
            Some(y)
        } else {
            debug!(prediction = y, "Simulator produced a non-finite prediction");
            None
        }
    }
}
