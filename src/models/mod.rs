//! Model artifacts: control policy, outcome simulator and attribution
//!
//! Everything here is loaded from directories written by the offline
//! training jobs. Nothing in this module writes to those directories.

pub mod attribution;
pub mod bundle;
pub mod policy;
pub mod simulator;

pub use attribution::{top_k, AttributionEngine, AttributionError};
pub use bundle::{find_latest, locate, resolve, AlgoMeta, BundleMeta, PolicyBundle};
pub use policy::{ActorNetwork, ControlPolicy, PolicyOutput};
pub use simulator::{SimulatorBundle, TreeEnsemble};

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure to load a policy bundle or simulator directory.
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error reading {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Model not found in {} (tried {})", .dir.display(), .tried.join(", "))]
    MissingWeights { dir: PathBuf, tried: Vec<String> },

    #[error("Unsupported algorithm '{0}' (expected one of PPO, A2C, SAC, TD3, DDPG)")]
    UnsupportedAlgorithm(String),

    #[error("Invalid bundle: {0}")]
    Invalid(String),
}

/// Read and deserialize one JSON artifact.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, BundleError> {
    let data = std::fs::read(path).map_err(|source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| BundleError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// First of `candidates` that exists inside `dir`.
pub(crate) fn first_existing(dir: &Path, candidates: &[&str]) -> Result<PathBuf, BundleError> {
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.is_file())
        .ok_or_else(|| BundleError::MissingWeights {
            dir: dir.to_path_buf(),
            tried: candidates.iter().map(|s| (*s).to_string()).collect(),
        })
}
