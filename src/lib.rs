//! BANDWISE: Band-Keeping Process Advisor
//!
//! Turns a trained control policy and an outcome simulator into checked,
//! explained recommendations for keeping a quality measurement inside its
//! target band.
//!
//! ## Architecture
//!
//! - **Models**: policy bundle, tree-ensemble simulator and TreeSHAP attribution
//! - **Reasoning**: per-session smoothing state and the advice pipeline
//! - **Registry**: concurrent sessions, hot model swaps, idle eviction
//! - **API**: JSON HTTP surface over the registry

pub mod api;
pub mod config;
pub mod models;
pub mod reasoning;
pub mod reward;
pub mod types;

// Re-export configuration
pub use config::AdvisorConfig;

// Re-export commonly used types
pub use types::{
    AdviceStatus, Degradation, FeatureComponent, FeatureRow, MissingFeature, ReasoningOutcome,
    ReasoningResult, TargetBand,
};

// Re-export model loading
pub use models::{BundleError, ControlPolicy, PolicyBundle, PolicyOutput, SimulatorBundle};

// Re-export the reasoning core
pub use reasoning::{
    ModelGeneration, ReasoningError, ReasoningSession, RegistryError, SessionRegistry,
};
