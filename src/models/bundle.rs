//! Policy bundle loading
//!
//! A bundle directory holds three files written by the training job:
//!
//! - `algo_meta.json`: which algorithm produced the actor and where its weights are
//! - `meta.json`: feature lists, action normalization and the target band
//! - the actor weights file named by `algo_meta.algo_file`
//!
//! Training runs live under a common base directory as
//! `<prefix>_<YYYYMMDD>_<HHMMSS>` folders. Inside a run the best checkpoint
//! (`best_model/`) wins over the final export (`policy_bundle/`), which wins
//! over files written straight into the run folder.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::policy::{ActorNetwork, ControlPolicy};
use super::{read_json, BundleError};
use crate::types::TargetBand;

pub const ALGO_META_FILE: &str = "algo_meta.json";
pub const BUNDLE_META_FILE: &str = "meta.json";

/// Subdirectories tried inside a run, best first. The run directory itself comes last.
const RUN_SUBDIRS: [&str; 2] = ["best_model", "policy_bundle"];

/// Run-name convention; captures the date and time of the run.
#[allow(clippy::expect_used)]
fn run_name_pattern() -> &'static Regex {
    static RUN_NAME: OnceLock<Regex> = OnceLock::new();
    RUN_NAME.get_or_init(|| {
        Regex::new(r"^(?:run|train|ppo|sac|td3|ddpg|a2c)[_-](\d{8})[_-](\d{6})")
            .expect("run-name pattern is a valid regex")
    })
}

/// `YYYYMMDDHHMMSS` of a run directory name, or `None` if it is not a run.
fn run_timestamp(name: &str) -> Option<String> {
    let caps = run_name_pattern().captures(name)?;
    Some(format!("{}{}", &caps[1], &caps[2]))
}

// ============================================================================
// Metadata files
// ============================================================================

/// Actor-critic families the exporter knows how to flatten into an actor network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Algorithm {
    Ppo,
    A2c,
    Sac,
    Td3,
    Ddpg,
}

impl FromStr for Algorithm {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PPO" => Ok(Self::Ppo),
            "A2C" => Ok(Self::A2c),
            "SAC" => Ok(Self::Sac),
            "TD3" => Ok(Self::Td3),
            "DDPG" => Ok(Self::Ddpg),
            _ => Err(BundleError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Contents of `algo_meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgoMeta {
    #[serde(default)]
    pub library: String,
    pub algo_name: String,
    pub algo_file: String,
    /// Unix time the bundle was exported
    #[serde(default)]
    pub saved_at_epoch: Option<f64>,
    /// Policy outputs are deltas from the current setpoints
    #[serde(default = "default_policy_diff")]
    pub policy_diff: bool,
}

fn default_policy_diff() -> bool {
    true
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMeta {
    pub bg_features: Vec<String>,
    pub action_features: Vec<String>,
    pub action_stds: Vec<f64>,
    pub target_range: [f64; 2],
    pub target_center: f64,
    /// Display ranges for secondary-axis charts, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2_axis_ranges: Option<BTreeMap<String, [f64; 2]>>,
}

// ============================================================================
// PolicyBundle
// ============================================================================

/// A loaded policy plus the business metadata needed to use it.
///
/// Immutable once built; a reload builds a new bundle.
#[derive(Debug, Clone)]
pub struct PolicyBundle {
    policy: Arc<dyn ControlPolicy>,
    meta: BundleMeta,
    algo: Option<AlgoMeta>,
    dir: Option<PathBuf>,
}

impl PolicyBundle {
    /// Load a bundle from a directory that directly contains `algo_meta.json`.
    pub fn load(dir: &Path) -> Result<Self, BundleError> {
        let algo: AlgoMeta = read_json(&dir.join(ALGO_META_FILE))?;
        let algorithm: Algorithm = algo.algo_name.parse()?;

        if !is_plain_file_name(&algo.algo_file) {
            return Err(BundleError::Invalid(format!(
                "algo_file '{}' must be a file name inside the bundle",
                algo.algo_file
            )));
        }
        let weights_path = dir.join(&algo.algo_file);
        if !weights_path.is_file() {
            return Err(BundleError::MissingWeights {
                dir: dir.to_path_buf(),
                tried: vec![algo.algo_file.clone()],
            });
        }

        let meta: BundleMeta = read_json(&dir.join(BUNDLE_META_FILE))?;
        let actor = ActorNetwork::load(&weights_path)?;
        debug!(
            dir = %dir.display(),
            algorithm = ?algorithm,
            library = %algo.library,
            actor = %actor.describe(),
            "Parsed policy bundle"
        );

        let mut bundle = Self::from_parts(Arc::new(actor), meta)?;
        bundle.algo = Some(algo);
        bundle.dir = Some(dir.to_path_buf());
        Ok(bundle)
    }

    /// Assemble a bundle from an in-memory policy, enforcing the load-time invariants.
    pub fn from_parts(policy: Arc<dyn ControlPolicy>, meta: BundleMeta) -> Result<Self, BundleError> {
        let n_act = meta.action_features.len();
        if meta.action_stds.len() != n_act {
            return Err(BundleError::Invalid(format!(
                "{} action_stds for {} action_features",
                meta.action_stds.len(),
                n_act
            )));
        }
        if let Some((name, std)) = meta
            .action_features
            .iter()
            .zip(&meta.action_stds)
            .find(|(_, s)| !(s.is_finite() && **s > 0.0))
        {
            return Err(BundleError::Invalid(format!(
                "action_std for '{name}' must be finite and > 0, got {std}"
            )));
        }
        let [low, high] = meta.target_range;
        if !(low.is_finite() && high.is_finite() && low <= high) {
            return Err(BundleError::Invalid(format!(
                "target_range [{low}, {high}] is not a valid band"
            )));
        }
        if !meta.target_center.is_finite() {
            return Err(BundleError::Invalid("target_center must be finite".into()));
        }
        if policy.output_dim() != n_act {
            return Err(BundleError::Invalid(format!(
                "policy emits {} actions but meta.json lists {} action_features",
                policy.output_dim(),
                n_act
            )));
        }

        let expected_state = meta.bg_features.len() + n_act + 1;
        if policy.input_dim() != expected_state {
            // Checked again on every call; a mismatch there yields a HOLD
            warn!(
                policy_inputs = policy.input_dim(),
                meta_inputs = expected_state,
                "Policy input width disagrees with meta.json feature lists"
            );
        }

        Ok(Self {
            policy,
            meta,
            algo: None,
            dir: None,
        })
    }

    pub fn policy(&self) -> &dyn ControlPolicy {
        self.policy.as_ref()
    }

    pub fn meta(&self) -> &BundleMeta {
        &self.meta
    }

    pub fn algo(&self) -> Option<&AlgoMeta> {
        self.algo.as_ref()
    }

    /// Directory the bundle was loaded from (`None` for in-memory bundles).
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn background_features(&self) -> &[String] {
        &self.meta.bg_features
    }

    pub fn action_features(&self) -> &[String] {
        &self.meta.action_features
    }

    pub fn action_stds(&self) -> &[f64] {
        &self.meta.action_stds
    }

    pub fn target_band(&self) -> TargetBand {
        TargetBand::from(self.meta.target_range)
    }

    pub fn target_center(&self) -> f64 {
        self.meta.target_center
    }
}

fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

// ============================================================================
// Bundle discovery
// ============================================================================

/// Inside a run directory, the preferred folder that holds `algo_meta.json`.
fn bundle_dir_in(run: &Path) -> Option<PathBuf> {
    RUN_SUBDIRS
        .iter()
        .map(|sub| run.join(sub))
        .chain(std::iter::once(run.to_path_buf()))
        .find(|candidate| candidate.join(ALGO_META_FILE).is_file())
}

/// Newest training run under `base_dir` that contains a bundle.
///
/// Runs are ordered by the timestamp embedded in their name, whatever the
/// prefix; the full name only breaks ties. A newer run without `algo_meta.json` yet, e.g. one still being written, is skipped.
pub fn find_latest(base_dir: &Path) -> Option<PathBuf> {
    let entries = match std::fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(base_dir = %base_dir.display(), error = %e, "Cannot scan bundle directory");
            return None;
        }
    };

    let mut runs: Vec<(String, String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            let stamp = run_timestamp(&name)?;
            Some((stamp, name, e.path()))
        })
        .collect();
    runs.sort_by(|a, b| (&b.0, &b.1).cmp(&(&a.0, &a.1)));

    runs.into_iter().find_map(|(_, _, path)| bundle_dir_in(&path))
}

/// Bundle for an explicitly named run (a subdirectory of `base_dir`).
pub fn resolve(base_dir: &Path, name: &str) -> Option<PathBuf> {
    let safe = Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe || name.is_empty() {
        warn!(bundle = %name, "Refusing bundle name outside the base directory");
        return None;
    }
    let run = base_dir.join(name);
    if !run.is_dir() {
        return None;
    }
    bundle_dir_in(&run)
}

/// Named bundle when `name` is set, otherwise the latest run.
pub fn locate(base_dir: &Path, name: Option<&str>) -> Option<PathBuf> {
    match name {
        Some(n) => resolve(base_dir, n),
        None => find_latest(base_dir),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::policy::PolicyOutput;

    #[derive(Debug)]
    struct Fixed {
        inputs: usize,
        out: Vec<f64>,
    }

    impl ControlPolicy for Fixed {
        fn input_dim(&self) -> usize {
            self.inputs
        }
        fn output_dim(&self) -> usize {
            self.out.len()
        }
        fn predict(&self, _state: &[f64]) -> PolicyOutput {
            PolicyOutput::Action(self.out.clone())
        }
    }

    fn meta() -> BundleMeta {
        BundleMeta {
            bg_features: vec!["temp".into()],
            action_features: vec!["speed".into()],
            action_stds: vec![2.0],
            target_range: [2.0, 4.0],
            target_center: 3.0,
            y2_axis_ranges: None,
        }
    }

    fn touch_bundle(dir: &Path) {
        std::fs::create_dir_all(dir).expect("mkdir");
        std::fs::write(dir.join(ALGO_META_FILE), "{}").expect("write");
    }

    #[test]
    fn test_algorithm_case_insensitive() {
        assert_eq!("ppo".parse::<Algorithm>().ok(), Some(Algorithm::Ppo));
        assert_eq!(" Sac ".parse::<Algorithm>().ok(), Some(Algorithm::Sac));
        assert!(matches!(
            "DQN".parse::<Algorithm>(),
            Err(BundleError::UnsupportedAlgorithm(_))
        ));
    }

    #[test]
    fn test_from_parts_rejects_std_mismatch() {
        let mut m = meta();
        m.action_stds = vec![1.0, 1.0];
        let policy = Arc::new(Fixed { inputs: 3, out: vec![0.0] });
        assert!(matches!(
            PolicyBundle::from_parts(policy, m),
            Err(BundleError::Invalid(_))
        ));
    }

    #[test]
    fn test_from_parts_rejects_non_positive_std() {
        let mut m = meta();
        m.action_stds = vec![0.0];
        let policy = Arc::new(Fixed { inputs: 3, out: vec![0.0] });
        assert!(PolicyBundle::from_parts(policy, m).is_err());
    }

    #[test]
    fn test_from_parts_rejects_inverted_band() {
        let mut m = meta();
        m.target_range = [4.0, 2.0];
        let policy = Arc::new(Fixed { inputs: 3, out: vec![0.0] });
        assert!(PolicyBundle::from_parts(policy, m).is_err());
    }

    #[test]
    fn test_from_parts_rejects_output_width() {
        let policy = Arc::new(Fixed { inputs: 3, out: vec![0.0, 0.0] });
        assert!(PolicyBundle::from_parts(policy, meta()).is_err());
    }

    #[test]
    fn test_from_parts_tolerates_input_width_drift() {
        let policy = Arc::new(Fixed { inputs: 7, out: vec![0.0] });
        let bundle = PolicyBundle::from_parts(policy, meta()).expect("input drift only warns");
        assert_eq!(bundle.target_band(), TargetBand::new(2.0, 4.0));
        assert!(bundle.dir().is_none());
    }

    #[test]
    fn test_find_latest_prefers_newest_and_best_model() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let base = tmp.path();
        touch_bundle(&base.join("run_20240101_120000"));
        let newer = base.join("ppo_20240301_080000");
        touch_bundle(&newer.join("policy_bundle"));
        touch_bundle(&newer.join("best_model"));
        // Not a run name
        touch_bundle(&base.join("scratch"));

        assert_eq!(find_latest(base), Some(newer.join("best_model")));
    }

    #[test]
    fn test_run_timestamp_ignores_prefix_and_separator() {
        assert_eq!(run_timestamp("train-20240505-010203").as_deref(), Some("20240505010203"));
        assert_eq!(run_timestamp("sac_20240505_010203_extra").as_deref(), Some("20240505010203"));
        assert_eq!(run_timestamp("scratch"), None);
    }

    #[test]
    fn test_find_latest_skips_incomplete_newest_run() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let base = tmp.path();
        let complete = base.join("train-20240101-000000");
        touch_bundle(&complete);
        std::fs::create_dir_all(base.join("train-20240505-000000")).expect("mkdir");

        assert_eq!(find_latest(base), Some(complete));
    }

    #[test]
    fn test_find_latest_empty_or_missing() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        assert_eq!(find_latest(tmp.path()), None);
        assert_eq!(find_latest(&tmp.path().join("nope")), None);
    }

    #[test]
    fn test_resolve_named_and_rejects_escape() {
        let tmp = tempfile::tempdir().expect("tmpdir");
        let run = tmp.path().join("custom");
        touch_bundle(&run.join("policy_bundle"));

        assert_eq!(resolve(tmp.path(), "custom"), Some(run.join("policy_bundle")));
        assert_eq!(resolve(tmp.path(), "../custom"), None);
        assert_eq!(resolve(tmp.path(), "missing"), None);
        assert_eq!(locate(tmp.path(), Some("custom")), Some(run.join("policy_bundle")));
    }

    #[test]
    fn test_plain_file_name() {
        assert!(is_plain_file_name("actor.json"));
        assert!(!is_plain_file_name("../actor.json"));
        assert!(!is_plain_file_name("sub/actor.json"));
        assert!(!is_plain_file_name(""));
    }
}
