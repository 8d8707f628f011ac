//! REST API module using Axum
//!
//! A thin JSON surface over the session registry:
//! - `GET    /api/v1/health`
//! - `POST   /api/v1/sessions/:id/advice`
//! - `POST   /api/v1/sessions/:id/reload`
//! - `GET    /api/v1/sessions/:id`
//! - `DELETE /api/v1/sessions/:id`

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::ApiState;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// Set `BANDWISE_CORS_ORIGINS` to a comma-separated list of allowed origins
/// for browser clients served from elsewhere.
fn build_cors_layer() -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    match std::env::var("BANDWISE_CORS_ORIGINS") {
        Ok(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            tracing::info!(origins = %origins, "CORS: allowing configured origins");
            base.allow_origin(allowed)
        }
        Err(_) => base,
    }
}

/// Create the complete application router.
///
/// The body limit is enforced by the extractors so an oversized body is
/// answered with a `PAYLOAD_TOO_LARGE` envelope.
pub fn create_app(state: ApiState, body_limit_bytes: usize) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_routes(state))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
}
