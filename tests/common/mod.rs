//! Shared fixtures: write policy bundles and simulators to temp directories.
//!
//! The fixture model:
//! - background `[temp]`, actions `[speed, feed]`, stds `[0.5, 2.0]`
//! - band `[2, 4]`, center 3
//! - the actor ignores its input and outputs `[0.4, -0.2]`
//! - the simulator reads `[temp, speed, valve]` and predicts 3.2 when
//!   `valve < 0.5`, else 6.0 (half the training cover on each side)

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

pub const ACTOR_FILE: &str = "actor.json";
pub const POLICY_OUTPUT: [f64; 2] = [0.4, -0.2];
pub const ACTION_STDS: [f64; 2] = [0.5, 2.0];
pub const PREDICT_LOW: f64 = 3.2;
pub const PREDICT_HIGH: f64 = 6.0;

pub fn write_json(path: &Path, value: &Value) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("create parent dir");
    }
    std::fs::write(path, serde_json::to_vec_pretty(value).expect("serialize")).expect("write json");
}

pub fn algo_meta(algo_name: &str) -> Value {
    json!({
        "library": "stable-baselines3",
        "algo_name": algo_name,
        "algo_file": ACTOR_FILE,
        "saved_at_epoch": 1_700_000_000.0,
        "policy_diff": true
    })
}

pub fn bundle_meta() -> Value {
    json!({
        "bg_features": ["temp"],
        "action_features": ["speed", "feed"],
        "action_stds": ACTION_STDS,
        "target_range": [2.0, 4.0],
        "target_center": 3.0
    })
}

/// Identity layer with zero weights: the output is the bias.
pub fn constant_actor(input_dim: usize, output: &[f64]) -> Value {
    json!({
        "input_dim": input_dim,
        "layers": [{
            "weights": vec![vec![0.0; input_dim]; output.len()],
            "bias": output,
            "activation": "identity"
        }],
        "output_squash": "none"
    })
}

/// Write a complete policy bundle into `dir`.
pub fn write_policy_bundle(dir: &Path) -> PathBuf {
    write_json(&dir.join("algo_meta.json"), &algo_meta("PPO"));
    write_json(&dir.join("meta.json"), &bundle_meta());
    write_json(&dir.join(ACTOR_FILE), &constant_actor(4, &POLICY_OUTPUT));
    dir.to_path_buf()
}

pub fn stump_model() -> Value {
    json!({
        "base_score": 0.0,
        "trees": [{
            "nodes": [
                { "feature": 2, "threshold": 0.5, "left": 1, "right": 2, "missing_left": true, "cover": 100.0 },
                { "leaf": PREDICT_LOW, "cover": 50.0 },
                { "leaf": PREDICT_HIGH, "cover": 50.0 }
            ]
        }]
    })
}

/// Write the stump simulator into `dir` using the primary file names.
pub fn write_simulator(dir: &Path) -> PathBuf {
    write_json(&dir.join("simulator_model.json"), &stump_model());
    write_json(&dir.join("simulator_features.json"), &json!(["temp", "speed", "valve"]));
    dir.to_path_buf()
}

/// Same simulator under the legacy file names.
pub fn write_legacy_simulator(dir: &Path) -> PathBuf {
    write_json(&dir.join("xgb_model.json"), &stump_model());
    write_json(&dir.join("feature_names.json"), &json!(["temp", "speed", "valve"]));
    dir.to_path_buf()
}

/// `<base>/simulator` plus a run `<base>/<run>/best_model`.
pub struct Artifacts {
    pub tmp: tempfile::TempDir,
    pub bundle_dir: PathBuf,
    pub simulator_dir: PathBuf,
}

impl Artifacts {
    pub fn new(run: &str) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let bundle_dir = write_policy_bundle(&tmp.path().join(run).join("best_model"));
        let simulator_dir = write_simulator(&tmp.path().join("simulator"));
        Self {
            tmp,
            bundle_dir,
            simulator_dir,
        }
    }

    pub fn base(&self) -> &Path {
        self.tmp.path()
    }
}

/// A row with every policy and simulator feature present.
pub fn full_row(valve: f64) -> bandwise::FeatureRow {
    bandwise::FeatureRow::new()
        .with("temp", 20.0)
        .with("speed", 10.0)
        .with("feed", 1.0)
        .with("valve", valve)
}

pub fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}
