//! Shared data structures for band-keeping advice
//!
//! - `FeatureRow`: one live sensor reading keyed by feature name
//! - `TargetBand`: the quality band the measurement must stay inside
//! - `ReasoningResult`: the classified, explained recommendation

mod band;
mod reasoning;
mod row;

pub use band::*;
pub use reasoning::*;
pub use row::*;
