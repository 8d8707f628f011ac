//! Session Registry
//!
//! Maps session ids to their reasoning state. Each session sits behind its
//! own `tokio::sync::Mutex`, so at most one reasoning or reload operation is
//! in flight per session while independent sessions run in parallel. The
//! map itself is guarded by a short-held `std::sync::Mutex` that is never
//! held across an `.await`.
//!
//! Inference is CPU-bound and runs on the blocking pool with an owned
//! session guard. The default model generation lives in an `ArcSwapOption`:
//! new sessions start from it and publishing a generation swaps it
//! atomically before reloading every existing session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::engine::{GenerationSummary, ModelGeneration, ReasoningSession, SessionSummary};
use super::ReasoningError;
use crate::models::BundleError;
use crate::types::{FeatureRow, ReasoningResult};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),

    #[error("Bundle load failed: {0}")]
    Load(#[from] BundleError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}

/// A session and when it was last touched.
#[derive(Debug)]
struct SessionSlot {
    session: ReasoningSession,
    last_used: Instant,
}

type SharedSlot = Arc<tokio::sync::Mutex<SessionSlot>>;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SharedSlot>>,
    default_generation: ArcSwapOption<ModelGeneration>,
    smoothing_window: usize,
    top_k: usize,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.session_count())
            .field("default_generation", &self.default_generation_id())
            .field("smoothing_window", &self.smoothing_window)
            .field("top_k", &self.top_k)
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(smoothing_window: usize, top_k: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_generation: ArcSwapOption::empty(),
            smoothing_window,
            top_k,
        }
    }

    pub fn from_config(config: &crate::config::AdvisorConfig) -> Self {
        Self::new(config.reasoning.smoothing_window, config.reasoning.top_k)
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, SharedSlot>> {
        self.sessions.lock().unwrap_or_else(|e| {
            warn!("Session map mutex poisoned, recovering");
            e.into_inner()
        })
    }

    /// Existing slot for `id`, or a new one starting from the default generation.
    fn slot(&self, id: &str) -> SharedSlot {
        let mut map = self.map();
        if let Some(slot) = map.get(id) {
            return Arc::clone(slot);
        }
        let session = match self.default_generation.load_full() {
            Some(generation) => {
                ReasoningSession::with_generation(generation, self.smoothing_window, self.top_k)
            }
            None => ReasoningSession::new(self.smoothing_window, self.top_k),
        };
        debug!(session = %id, "Session created");
        let slot = Arc::new(tokio::sync::Mutex::new(SessionSlot {
            session,
            last_used: Instant::now(),
        }));
        map.insert(id.to_string(), Arc::clone(&slot));
        slot
    }

    pub fn session_count(&self) -> usize {
        self.map().len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.map().contains_key(id)
    }

    pub fn default_generation(&self) -> Option<Arc<ModelGeneration>> {
        self.default_generation.load_full()
    }

    pub fn default_generation_id(&self) -> Option<u64> {
        self.default_generation.load().as_ref().map(|g| g.id())
    }

    /// Run one reasoning call for session `id`, creating the session if needed.
    pub async fn advise(
        &self,
        id: &str,
        row: FeatureRow,
        measurement: f64,
    ) -> Result<ReasoningResult, RegistryError> {
        let mut guard = self.slot(id).lock_owned().await;
        let result = tokio::task::spawn_blocking(move || {
            guard.last_used = Instant::now();
            guard.session.reasoned_advice(&row, measurement)
        })
        .await??;
        Ok(result)
    }

    /// Load a generation on the blocking pool without touching any session.
    pub async fn load_generation(
        policy_dir: PathBuf,
        simulator_dir: Option<PathBuf>,
    ) -> Result<Arc<ModelGeneration>, RegistryError> {
        let generation = tokio::task::spawn_blocking(move || {
            ModelGeneration::load(&policy_dir, simulator_dir.as_deref())
        })
        .await??;
        Ok(Arc::new(generation))
    }

    /// Load new bundles for one session. The old generation keeps serving
    /// until the new one is fully built; on failure it stays in place.
    pub async fn reload_session(
        &self,
        id: &str,
        policy_dir: PathBuf,
        simulator_dir: Option<PathBuf>,
    ) -> Result<GenerationSummary, RegistryError> {
        let generation = match Self::load_generation(policy_dir.clone(), simulator_dir).await {
            Ok(g) => g,
            Err(e) => {
                warn!(session = %id, bundle = %policy_dir.display(), error = %e, "Session reload failed, keeping current generation");
                return Err(e);
            }
        };
        let summary = generation.summary();
        let slot = self.slot(id);
        let mut guard = slot.lock().await;
        guard.session.reload(generation);
        guard.last_used = Instant::now();
        info!(session = %id, generation = summary.id, "Session reloaded");
        Ok(summary)
    }

    /// Make `generation` the default and move every existing session onto it.
    ///
    /// Returns the number of sessions reloaded.
    pub async fn publish_generation(&self, generation: Arc<ModelGeneration>) -> usize {
        self.default_generation.store(Some(Arc::clone(&generation)));
        let slots: Vec<SharedSlot> = self.map().values().cloned().collect();
        for slot in &slots {
            slot.lock().await.session.reload(Arc::clone(&generation));
        }
        info!(
            generation = generation.id(),
            sessions = slots.len(),
            "Published model generation"
        );
        slots.len()
    }

    /// Summary of an existing session. Does not create one.
    pub async fn session_summary(&self, id: &str) -> Option<SessionSummary> {
        let slot = self.map().get(id).cloned()?;
        let guard = slot.lock().await;
        Some(guard.session.summary())
    }

    /// Drop a session. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.map().remove(id).is_some();
        if removed {
            debug!(session = %id, "Session removed");
        }
        removed
    }

    /// Drop sessions unused for longer than `max_idle`. Sessions with a call
    /// in flight are kept. Returns the number evicted.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard.last_used.elapsed() <= max_idle,
            Err(_) => true,
        });
        let evicted = before - map.len();
        if evicted > 0 {
            info!(evicted, remaining = map.len(), "Evicted idle sessions");
        }
        evicted
    }
}

/// Periodically evict idle sessions until `cancel` fires.
pub async fn run_eviction_loop(
    registry: Arc<SessionRegistry>,
    max_idle: Duration,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Session eviction loop cancelled");
                return;
            }
            _ = ticker.tick() => {
                registry.evict_idle(max_idle);
            }
        }
    }
}
