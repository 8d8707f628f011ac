//! API handlers: thin adapters from HTTP to the session registry.
//!
//! All handlers return `Response` via [`ApiResponse::ok`] or [`ApiErrorResponse`].

use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, State};
use axum::response::Response;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::envelope::{ApiErrorResponse, ApiJson, ApiResponse, OptionalApiJson};
use crate::models::bundle;
use crate::reasoning::{ReasoningError, RegistryError, SessionRegistry};
use crate::types::FeatureRow;

/// Longest accepted session id.
const MAX_SESSION_ID_LEN: usize = 128;

// ============================================================================
// State
// ============================================================================

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SessionRegistry>,
    /// Root that named bundles and simulator directories are resolved against
    pub base_dir: PathBuf,
    /// Simulator used when a reload request does not name one
    pub simulator_dir: Option<PathBuf>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(registry: Arc<SessionRegistry>, base_dir: PathBuf, simulator_dir: Option<PathBuf>) -> Self {
        Self {
            registry,
            base_dir,
            simulator_dir,
            started_at: Instant::now(),
        }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AdviceRequest {
    pub row: FeatureRow,
    pub measurement: f64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReloadRequest {
    /// Run name under the base directory; latest run when absent
    #[serde(default)]
    pub bundle: Option<String>,
    /// Simulator directory relative to the base directory
    #[serde(default)]
    pub simulator: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub default_generation: Option<u64>,
    pub sessions: usize,
    pub uptime_secs: u64,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    pub session: String,
    pub removed: bool,
}

fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
}

fn invalid_session_id(id: &str) -> Response {
    ApiErrorResponse::bad_request(format!(
        "invalid session id '{id}': use up to {MAX_SESSION_ID_LEN} characters from [A-Za-z0-9-_.:]"
    ))
}

/// `rel` joined under `base`, refusing absolute paths and `..`.
fn under_base(base: &FsPath, rel: &FsPath) -> Option<PathBuf> {
    let plain = rel.components().all(|c| matches!(c, Component::Normal(_)));
    (plain && !rel.as_os_str().is_empty()).then(|| base.join(rel))
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /api/v1/health
pub async fn health(State(state): State<ApiState>) -> Response {
    let default_generation = state.registry.default_generation_id();
    ApiResponse::ok(HealthResponse {
        status: if default_generation.is_some() { "ok" } else { "no_model" },
        default_generation,
        sessions: state.registry.session_count(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// POST /api/v1/sessions/:id/advice
pub async fn advise(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AdviceRequest>,
) -> Response {
    if !valid_session_id(&id) {
        return invalid_session_id(&id);
    }
    if !req.measurement.is_finite() {
        return ApiErrorResponse::bad_request("measurement must be a finite number");
    }
    match state.registry.advise(&id, req.row, req.measurement).await {
        Ok(result) => ApiResponse::ok(result),
        Err(RegistryError::Reasoning(ReasoningError::MissingFeature(missing))) => {
            ApiErrorResponse::missing_feature(missing.to_string())
        }
        Err(e) => {
            warn!(session = %id, error = %e, "Advice request failed");
            ApiErrorResponse::internal(e.to_string())
        }
    }
}

/// POST /api/v1/sessions/:id/reload
pub async fn reload(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    OptionalApiJson(body): OptionalApiJson<ReloadRequest>,
) -> Response {
    if !valid_session_id(&id) {
        return invalid_session_id(&id);
    }
    let req = body.unwrap_or_default();

    let Some(policy_dir) = bundle::locate(&state.base_dir, req.bundle.as_deref()) else {
        return ApiErrorResponse::not_found(match &req.bundle {
            Some(name) => format!("bundle '{name}' not found"),
            None => "no bundle found under the configured base directory".to_string(),
        });
    };
    let simulator_dir = match &req.simulator {
        Some(rel) => match under_base(&state.base_dir, rel) {
            Some(dir) => Some(dir),
            None => {
                return ApiErrorResponse::bad_request(
                    "simulator must be a relative directory inside the base directory",
                )
            }
        },
        None => state.simulator_dir.clone(),
    };

    match state.registry.reload_session(&id, policy_dir, simulator_dir).await {
        Ok(summary) => ApiResponse::ok(summary),
        Err(e) => ApiErrorResponse::service_unavailable(format!(
            "reload failed, previous model kept: {e}"
        )),
    }
}

/// GET /api/v1/sessions/:id
pub async fn get_session(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    match state.registry.session_summary(&id).await {
        Some(summary) => ApiResponse::ok(summary),
        None => ApiErrorResponse::not_found(format!("session '{id}' not found")),
    }
}

/// DELETE /api/v1/sessions/:id
pub async fn delete_session(State(state): State<ApiState>, Path(id): Path<String>) -> Response {
    if state.registry.remove(&id) {
        ApiResponse::ok(RemovedResponse {
            session: id,
            removed: true,
        })
    } else {
        ApiErrorResponse::not_found(format!("session '{id}' not found"))
    }
}
