//! Feature attribution for simulator predictions.
//!
//! Exact path-dependent TreeSHAP (Lundberg, Erion & Lee, "Consistent
//! Individualized Feature Attribution for Tree Ensembles", Algorithm 2).
//! Each tree is walked once, carrying the set of features seen on the
//! current root-to-node path together with the fraction of "feature absent"
//! (cover-weighted) and "feature present" (follows `x`) paths. At each leaf
//! the leaf value is shared among the path features by Shapley weights.
//!
//! The contributions plus [`AttributionEngine::expected_value`] reproduce
//! the ensemble prediction exactly (local accuracy).

use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use super::simulator::{Node, SimulatorBundle, Tree, PARALLEL_TREE_THRESHOLD};
use crate::types::{FeatureRow, MissingFeature};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributionError {
    #[error(transparent)]
    MissingFeature(#[from] MissingFeature),

    #[error("Non-finite contribution for feature '{0}'")]
    NonFinite(String),

    #[error("Tree {tree} node {node} has cover {cover}; attribution needs positive covers")]
    InvalidCover { tree: usize, node: usize, cover: f64 },

    #[error("Got {values} attribution values for {features} features")]
    LengthMismatch { values: usize, features: usize },
}

/// One entry of the unique feature path.
#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// `None` for the root placeholder
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Grow the path by one feature and update the permutation weights.
fn extend(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let d = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        weight: if d == 0 { 1.0 } else { 0.0 },
    });
    let denom = (d + 1) as f64;
    for i in (0..d).rev() {
        path[i + 1].weight += one_fraction * path[i].weight * (i + 1) as f64 / denom;
        path[i].weight = zero_fraction * path[i].weight * (d - i) as f64 / denom;
    }
}

/// Undo a previous [`extend`] of the element at `index`.
fn unwind(path: &mut Vec<PathElement>, index: usize) {
    let d = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let denom = (d + 1) as f64;
    let mut next_one_portion = path[d].weight;

    for i in (0..d).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * denom / ((i + 1) as f64 * one);
            next_one_portion = tmp - path[i].weight * zero * (d - i) as f64 / denom;
        } else {
            path[i].weight = path[i].weight * denom / (zero * (d - i) as f64);
        }
    }

    for i in index..d {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.truncate(d);
}

/// Total permutation weight if the element at `index` were unwound.
fn unwound_path_sum(path: &[PathElement], index: usize) -> f64 {
    let d = path.len() - 1;
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next_one_portion = path[d].weight;
    let mut total = 0.0;

    if one != 0.0 {
        for i in (0..d).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero * (d - i) as f64;
        }
    } else {
        for i in (0..d).rev() {
            total += path[i].weight / (zero * (d - i) as f64);
        }
    }
    total * (d + 1) as f64
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    tree: &Tree,
    x: &[f64],
    phi: &mut [f64],
    node: usize,
    mut path: Vec<PathElement>,
    zero_fraction: f64,
    one_fraction: f64,
    feature: Option<usize>,
) {
    extend(&mut path, zero_fraction, one_fraction, feature);

    match &tree.nodes[node] {
        Node::Leaf { leaf, .. } => {
            for i in 1..path.len() {
                let el = path[i];
                if let Some(f) = el.feature {
                    let w = unwound_path_sum(&path, i);
                    phi[f] += w * (el.one_fraction - el.zero_fraction) * leaf;
                }
            }
        }
        Node::Split {
            feature: split,
            threshold,
            left,
            right,
            missing_left,
            cover,
        } => {
            let hot = Tree::route(x[*split], *threshold, *left, *right, *missing_left);
            let cold = if hot == *left { *right } else { *left };
            let hot_zero = tree.nodes[hot].cover() / cover;
            let cold_zero = tree.nodes[cold].cover() / cover;

            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(k) = path.iter().position(|e| e.feature == Some(*split)) {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                unwind(&mut path, k);
            }

            recurse(
                tree,
                x,
                phi,
                hot,
                path.clone(),
                hot_zero * incoming_zero,
                incoming_one,
                Some(*split),
            );
            recurse(
                tree,
                x,
                phi,
                cold,
                path,
                cold_zero * incoming_zero,
                0.0,
                Some(*split),
            );
        }
    }
}

/// Contributions of one tree, added into `phi`.
fn tree_shap(tree: &Tree, x: &[f64], phi: &mut [f64]) {
    let capacity = tree.max_depth() + 2;
    recurse(tree, x, phi, 0, Vec::with_capacity(capacity), 1.0, 1.0, None);
}

/// Cover-weighted mean output of one tree.
fn tree_expectation(tree: &Tree, node: usize) -> f64 {
    match &tree.nodes[node] {
        Node::Leaf { leaf, .. } => *leaf,
        Node::Split {
            left, right, cover, ..
        } => {
            (tree.nodes[*left].cover() * tree_expectation(tree, *left)
                + tree.nodes[*right].cover() * tree_expectation(tree, *right))
                / cover
        }
    }
}

/// TreeSHAP explainer bound to one loaded simulator.
#[derive(Debug, Clone)]
pub struct AttributionEngine {
    simulator: Arc<SimulatorBundle>,
    expected_value: f64,
}

impl AttributionEngine {
    /// Build the explainer. Every node must carry a positive, finite cover.
    pub fn new(simulator: Arc<SimulatorBundle>) -> Result<Self, AttributionError> {
        let ensemble = simulator.ensemble();
        for (t, tree) in ensemble.trees.iter().enumerate() {
            for (n, node) in tree.nodes.iter().enumerate() {
                let cover = node.cover();
                if !(cover.is_finite() && cover > 0.0) {
                    return Err(AttributionError::InvalidCover {
                        tree: t,
                        node: n,
                        cover,
                    });
                }
            }
        }
        let expected_value = ensemble.base_score
            + ensemble
                .trees
                .iter()
                .map(|t| tree_expectation(t, 0))
                .sum::<f64>();
        Ok(Self {
            simulator,
            expected_value,
        })
    }

    /// Mean ensemble output over the training distribution.
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    pub fn feature_names(&self) -> &[String] {
        self.simulator.feature_names()
    }

    /// One signed contribution per simulator feature, in simulator order.
    pub fn explain(&self, row: &FeatureRow) -> Result<Vec<f64>, AttributionError> {
        let x = self.simulator.feature_vector(row)?;
        self.explain_vector(&x)
    }

    /// Same as [`explain`](Self::explain) for an already ordered feature vector.
    pub fn explain_vector(&self, x: &[f64]) -> Result<Vec<f64>, AttributionError> {
        let names = self.simulator.feature_names();
        if x.len() != names.len() {
            return Err(AttributionError::LengthMismatch {
                values: x.len(),
                features: names.len(),
            });
        }
        let n = names.len();
        let trees = &self.simulator.ensemble().trees;

        let phi = if trees.len() >= PARALLEL_TREE_THRESHOLD {
            trees
                .par_iter()
                .fold(
                    || vec![0.0; n],
                    |mut acc, tree| {
                        tree_shap(tree, x, &mut acc);
                        acc
                    },
                )
                .reduce(
                    || vec![0.0; n],
                    |mut a, b| {
                        a.iter_mut().zip(b).for_each(|(l, r)| *l += r);
                        a
                    },
                )
        } else {
            let mut acc = vec![0.0; n];
            for tree in trees {
                tree_shap(tree, x, &mut acc);
            }
            acc
        };

        if let Some(i) = phi.iter().position(|v| !v.is_finite()) {
            return Err(AttributionError::NonFinite(names[i].clone()));
        }
        Ok(phi)
    }

    /// Top-`k` labels for `values`, which must line up with the simulator features.
    pub fn rank(&self, values: &[f64], k: usize) -> Result<Vec<String>, AttributionError> {
        let names = self.simulator.feature_names();
        if values.len() != names.len() {
            return Err(AttributionError::LengthMismatch {
                values: values.len(),
                features: names.len(),
            });
        }
        Ok(top_k(values, names, k))
    }
}

/// Format the `k` largest contributions as `"<feature> (<UP|DOWN> <|value|>)"`.
///
/// Sorted by absolute value, descending; ties keep feature order. Asking for
/// more entries than exist returns all of them.
pub fn top_k(values: &[f64], feature_names: &[String], k: usize) -> Vec<String> {
    let mut ranked: Vec<(&String, f64)> = feature_names.iter().zip(values.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
    ranked
        .into_iter()
        .take(k)
        .map(|(name, v)| {
            let direction = if v >= 0.0 { "UP" } else { "DOWN" };
            format!("{name} ({direction} {:.3})", v.abs())
        })
        .collect()
}
