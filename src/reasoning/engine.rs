//! Reasoning Orchestrator
//!
//! A `ModelGeneration` bundles everything loaded from disk for one policy
//! and simulator pair. It is built off to the side and shared read-only via
//! `Arc`. A `ReasoningSession` owns the per-session smoothing state and
//! swaps generations atomically with respect to its own calls.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::buffer::{PushOutcome, SmoothingBuffer};
use super::diagnosis;
use super::ReasoningError;
use crate::models::{
    AttributionEngine, AttributionError, BundleError, PolicyBundle, PolicyOutput, SimulatorBundle,
};
use crate::reward::denormalize;
use crate::types::{
    AdviceStatus, Degradation, FeatureComponent, FeatureRow, ReasoningOutcome, ReasoningResult,
    TargetBand,
};

static NEXT_GENERATION_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// Model generation
// ============================================================================

/// A fully validated policy/simulator pair plus its attribution engine.
#[derive(Debug)]
pub struct ModelGeneration {
    id: u64,
    policy: PolicyBundle,
    simulator: Option<Arc<SimulatorBundle>>,
    attribution: Option<AttributionEngine>,
    /// Why the attribution engine could not be built for this simulator
    attribution_error: Option<String>,
    loaded_at: DateTime<Utc>,
}

impl ModelGeneration {
    /// Load a policy bundle and, when given, a simulator directory.
    ///
    /// Any failure leaves nothing half-built: the caller keeps whatever
    /// generation it already had.
    pub fn load(policy_dir: &Path, simulator_dir: Option<&Path>) -> Result<Self, BundleError> {
        let policy = PolicyBundle::load(policy_dir)?;
        let simulator = simulator_dir.map(SimulatorBundle::load).transpose()?;
        let generation = Self::from_parts(policy, simulator);
        info!(
            generation = generation.id,
            bundle = %policy_dir.display(),
            simulator = simulator_dir.map(|d| d.display().to_string()).unwrap_or_default(),
            "Model generation loaded"
        );
        Ok(generation)
    }

    /// Assemble a generation from already loaded parts.
    pub fn from_parts(policy: PolicyBundle, simulator: Option<SimulatorBundle>) -> Self {
        let simulator = simulator.map(Arc::new);
        let (attribution, attribution_error) = match &simulator {
            Some(sim) => match AttributionEngine::new(Arc::clone(sim)) {
                Ok(engine) => (Some(engine), None),
                Err(e) => {
                    warn!(error = %e, "Attribution engine unavailable for this simulator");
                    (None, Some(e.to_string()))
                }
            },
            None => (None, None),
        };
        Self {
            id: NEXT_GENERATION_ID.fetch_add(1, Ordering::Relaxed),
            policy,
            simulator,
            attribution,
            attribution_error,
            loaded_at: Utc::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn policy(&self) -> &PolicyBundle {
        &self.policy
    }

    pub fn simulator(&self) -> Option<&SimulatorBundle> {
        self.simulator.as_deref()
    }

    pub fn attribution(&self) -> Option<&AttributionEngine> {
        self.attribution.as_ref()
    }

    pub fn summary(&self) -> GenerationSummary {
        GenerationSummary {
            id: self.id,
            bundle_dir: self.policy.dir().map(Path::to_path_buf),
            algorithm: self.policy.algo().map(|a| a.algo_name.clone()),
            simulator_dir: self.simulator.as_ref().and_then(|s| s.dir().map(Path::to_path_buf)),
            simulator_features: self.simulator.as_ref().map_or(0, |s| s.feature_names().len()),
            attribution_available: self.attribution.is_some(),
            attribution_error: self.attribution_error.clone(),
            target_band: self.policy.target_band(),
            target_center: self.policy.target_center(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Serializable description of a generation for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationSummary {
    pub id: u64,
    pub bundle_dir: Option<PathBuf>,
    pub algorithm: Option<String>,
    pub simulator_dir: Option<PathBuf>,
    pub simulator_features: usize,
    pub attribution_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution_error: Option<String>,
    pub target_band: TargetBand,
    pub target_center: f64,
    pub loaded_at: DateTime<Utc>,
}

/// Serializable description of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub generation: Option<GenerationSummary>,
    pub action_buffer_len: usize,
    pub attribution_buffer_len: usize,
    pub smoothing_window: usize,
}

// ============================================================================
// Session
// ============================================================================

/// Per-session reasoning state.
///
/// Not shared between sessions. Callers serialize access (see the registry).
#[derive(Debug)]
pub struct ReasoningSession {
    generation: Option<Arc<ModelGeneration>>,
    action_buffer: SmoothingBuffer,
    attribution_buffer: SmoothingBuffer,
    top_k: usize,
}

/// Attribution lists for one call.
struct Attribution {
    top: Vec<String>,
    smoothed: Vec<String>,
    reset: bool,
}

impl ReasoningSession {
    pub fn new(smoothing_window: usize, top_k: usize) -> Self {
        Self {
            generation: None,
            action_buffer: SmoothingBuffer::new(smoothing_window),
            attribution_buffer: SmoothingBuffer::new(smoothing_window),
            top_k,
        }
    }

    pub fn with_generation(generation: Arc<ModelGeneration>, smoothing_window: usize, top_k: usize) -> Self {
        let mut session = Self::new(smoothing_window, top_k);
        session.generation = Some(generation);
        session
    }

    /// Publish a new generation. Both buffers are cleared in the same step.
    pub fn reload(&mut self, generation: Arc<ModelGeneration>) -> Option<Arc<ModelGeneration>> {
        self.action_buffer.clear();
        self.attribution_buffer.clear();
        self.generation.replace(generation)
    }

    pub fn generation(&self) -> Option<&Arc<ModelGeneration>> {
        self.generation.as_ref()
    }

    pub fn buffer_lens(&self) -> (usize, usize) {
        (self.action_buffer.len(), self.attribution_buffer.len())
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            generation: self.generation.as_ref().map(|g| g.summary()),
            action_buffer_len: self.action_buffer.len(),
            attribution_buffer_len: self.attribution_buffer.len(),
            smoothing_window: self.action_buffer.capacity(),
        }
    }

    /// Produce one checked, explained recommendation for the reading `row`
    /// with current measurement `measurement`.
    pub fn reasoned_advice(
        &mut self,
        row: &FeatureRow,
        measurement: f64,
    ) -> Result<ReasoningResult, ReasoningError> {
        let Some(generation) = self.generation.clone() else {
            return Ok(ReasoningResult::hold(
                measurement,
                ReasoningOutcome::NotReady,
                diagnosis::NOT_READY.to_string(),
            ));
        };
        let bundle = generation.policy();
        if bundle.background_features().is_empty() {
            let mut result = ReasoningResult::hold(
                measurement,
                ReasoningOutcome::NotReady,
                diagnosis::NOT_READY.to_string(),
            );
            result.generation = Some(generation.id());
            return Ok(result);
        }

        let background = row.require_all(bundle.background_features(), FeatureComponent::Background)?;
        let current = row.require_all(bundle.action_features(), FeatureComponent::Action)?;
        let state: Vec<f64> = background
            .iter()
            .chain(&current)
            .copied()
            .chain(std::iter::once(measurement))
            .collect();

        let action = match bundle.policy().predict(&state) {
            PolicyOutput::Action(action) => action,
            PolicyOutput::DimMismatch { expected, actual } => {
                warn!(
                    generation = generation.id(),
                    expected, actual, "Policy state width mismatch, holding"
                );
                let mut result = ReasoningResult::hold(
                    measurement,
                    ReasoningOutcome::DimMismatch { expected, actual },
                    diagnosis::dim_mismatch(expected, actual),
                );
                result.current_action_values.clone_from(&current);
                result.action_features = bundle.action_features().to_vec();
                result.generation = Some(generation.id());
                return Ok(result);
            }
        };

        let band = bundle.target_band();
        let in_band = band.contains(measurement);
        let delta_raw = if in_band {
            vec![0.0; current.len()]
        } else {
            denormalize(&action, bundle.action_stds())
        };

        let mut degradations = Vec::new();
        if let PushOutcome::Reset { .. } = self.action_buffer.push(delta_raw.clone()) {
            degradations.push(Degradation::BufferReset);
        }
        let delta_smoothed = self
            .action_buffer
            .average()
            .unwrap_or_else(|| delta_raw.clone());

        // Forecast for the current row, not the hypothetical post-move row
        let predicted_next = generation.simulator().and_then(|sim| sim.predict_next(row));
        if predicted_next.is_none() {
            degradations.push(Degradation::SimulatorUnavailable);
        }

        let center = bundle.target_center();
        let (status, improvement) = match (in_band, predicted_next) {
            (true, _) => (AdviceStatus::Hold, None),
            (false, Some(predicted)) => {
                let improvement = (measurement - center).abs() - (predicted - center).abs();
                let status = if improvement < 0.0 {
                    AdviceStatus::Conflict
                } else {
                    AdviceStatus::Move
                };
                (status, Some(improvement))
            }
            (false, None) => (AdviceStatus::Move, None),
        };

        let (top_attribution, top_attribution_smoothed) = match (generation.simulator(), generation.attribution()) {
            (None, _) => (Vec::new(), Vec::new()),
            (Some(_), None) => {
                degradations.push(Degradation::AttributionFailed);
                (Vec::new(), Vec::new())
            }
            (Some(_), Some(engine)) => match self.attribute(engine, row) {
                Ok(a) => {
                    if a.reset && !degradations.contains(&Degradation::BufferReset) {
                        degradations.push(Degradation::BufferReset);
                    }
                    (a.top, a.smoothed)
                }
                // Incomplete simulator input is already reported as SimulatorUnavailable
                Err(AttributionError::MissingFeature(_)) => (Vec::new(), Vec::new()),
                Err(e) => {
                    warn!(generation = generation.id(), error = %e, "Attribution failed");
                    degradations.push(Degradation::AttributionFailed);
                    (Vec::new(), Vec::new())
                }
            },
        };

        let suggested_action_values = add(&current, &delta_raw);
        let suggested_action_values_smoothed = add(&current, &delta_smoothed);
        let diagnosis = diagnosis::describe(status, measurement, predicted_next);

        debug!(
            generation = generation.id(),
            %status,
            measurement,
            predicted = ?predicted_next,
            improvement = ?improvement,
            degraded = !degradations.is_empty(),
            "Reasoned advice"
        );

        Ok(ReasoningResult {
            current_measurement: measurement,
            predicted_next,
            current_action_values: current,
            delta_raw,
            delta_smoothed,
            suggested_action_values,
            suggested_action_values_smoothed,
            action_features: bundle.action_features().to_vec(),
            top_attribution,
            top_attribution_smoothed,
            status,
            outcome: ReasoningOutcome::Advised,
            degradations,
            improvement,
            diagnosis,
            generation: Some(generation.id()),
            timestamp: Utc::now(),
        })
    }

    fn attribute(&mut self, engine: &AttributionEngine, row: &FeatureRow) -> Result<Attribution, AttributionError> {
        let values = engine.explain(row)?;
        let top = engine.rank(&values, self.top_k)?;
        let reset = matches!(self.attribution_buffer.push(values), PushOutcome::Reset { .. });
        let smoothed = match self.attribution_buffer.average() {
            Some(avg) => engine.rank(&avg, self.top_k)?,
            None => Vec::new(),
        };
        Ok(Attribution { top, smoothed, reset })
    }
}

fn add(a: &[f64], b: &[f64]) -> Vec<f64> {
    a.iter().zip(b).map(|(x, d)| x + d).collect()
}

// ============================================================================
// Tests
// ============================================================================
