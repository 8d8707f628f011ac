//! Agentic reasoning: per-session inference over a loaded policy/simulator pair
//!
//! ## Pipeline (one call per sensor reading)
//!
//! 1. Readiness check (no model → HOLD, "no model loaded")
//! 2. State vector `background ++ action ++ [y]` from the live row
//! 3. Policy evaluation (wrong state width → HOLD with diagnostic)
//! 4. Dead band: in-band measurements force a zero delta
//! 5. De-normalization and action smoothing
//! 6. Simulator forecast for the current row, conflict check
//! 7. TreeSHAP attribution, instantaneous and smoothed
//!
//! Only a missing policy feature is returned as an error. Everything else
//! degrades into a valid [`ReasoningResult`](crate::types::ReasoningResult).

pub mod buffer;
pub mod diagnosis;
pub mod engine;
pub mod registry;

pub use buffer::{PushOutcome, SmoothingBuffer};
pub use engine::{GenerationSummary, ModelGeneration, ReasoningSession, SessionSummary};
pub use registry::{RegistryError, SessionRegistry};

use thiserror::Error;

use crate::types::MissingFeature;

/// The only failure a reasoning call surfaces to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasoningError {
    /// A declared policy feature is absent from the row (upstream configuration error)
    #[error(transparent)]
    MissingFeature(#[from] MissingFeature),
}
