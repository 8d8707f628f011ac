//! JSON envelope for everything that crosses the HTTP boundary.
//!
//! Outbound, every response is `{ "data": T, "meta": {..} }` or
//! `{ "error": { "code", "message" }, "meta": {..} }`. Inbound, request
//! bodies go through [`ApiJson`] / [`OptionalApiJson`] so that malformed or
//! oversized bodies are answered in the same error shape instead of axum's
//! plain-text rejections.

use axum::body::Bytes;
use axum::extract::rejection::{BytesRejection, JsonRejection};
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{async_trait, Json};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Metadata included in every response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Successful response: `{ "data": T, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Machine-readable error codes. Each maps to exactly one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    NotFound,
    PayloadTooLarge,
    /// A declared model feature is absent from the submitted row
    MissingFeature,
    InternalError,
    ServiceUnavailable,
}

impl ErrorCode {
    pub const fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MissingFeature => StatusCode::UNPROCESSABLE_ENTITY,
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
}

/// Error response: `{ "error": { "code": "...", "message": "..." }, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code,
                message: message.into(),
            },
            meta: ResponseMeta::default(),
        };
        (code.status(), Json(body)).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::NotFound, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::BadRequest, msg)
    }

    pub fn missing_feature(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::MissingFeature, msg)
    }

    pub fn internal(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::InternalError, msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Response {
        Self::new(ErrorCode::ServiceUnavailable, msg)
    }
}

// ============================================================================
// Request bodies
// ============================================================================

/// Body-read failures: over the limit is 413, anything else is a bad request.
fn body_error(status: StatusCode, detail: String) -> Response {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiErrorResponse::new(
            ErrorCode::PayloadTooLarge,
            "request body exceeds the configured limit",
        )
    } else {
        ApiErrorResponse::bad_request(detail)
    }
}

fn json_rejection(rejection: &JsonRejection) -> Response {
    body_error(rejection.status(), rejection.body_text())
}

fn bytes_rejection(rejection: &BytesRejection) -> Response {
    body_error(rejection.status(), rejection.body_text())
}

/// `Json<T>` whose rejections are enveloped. Malformed bodies are always 400
/// so they cannot be confused with a 422 `MISSING_FEATURE`.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(json_rejection(&rejection)),
        }
    }
}

/// A JSON body that may be left out entirely. An empty body is `None`;
/// a non-empty body must parse.
#[derive(Debug)]
pub struct OptionalApiJson<T>(pub Option<T>);

#[async_trait]
impl<S, T> FromRequest<S> for OptionalApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|r| bytes_rejection(&r))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self(None));
        }
        serde_json::from_slice(&bytes)
            .map(|value| Self(Some(value)))
            .map_err(|e| ApiErrorResponse::bad_request(format!("invalid JSON body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[derive(Debug, serde::Deserialize)]
    struct Reading {
        value: f64,
    }

    fn post(body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn test_ok_response_shape() {
        let resp = ApiResponse::ok(serde_json::json!({"hello": "world"}));
        assert_eq!(resp.status(), StatusCode::OK);

        let v = body_json(resp).await;
        assert_eq!(v["data"]["hello"], "world");
        assert_eq!(v["meta"]["version"], env!("CARGO_PKG_VERSION"));
        assert!(v["meta"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_missing_feature_is_422() {
        let resp = ApiErrorResponse::missing_feature("missing action feature 'speed'");
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let v = body_json(resp).await;
        assert_eq!(v["error"]["code"], "MISSING_FEATURE");
        assert_eq!(v["error"]["message"], "missing action feature 'speed'");
    }

    #[tokio::test]
    async fn test_wrong_shape_json_is_enveloped_400() {
        let err = ApiJson::<Reading>::from_request(post(r#"{"value": "high"}"#), &())
            .await
            .expect_err("string is not a number");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        let v = body_json(err).await;
        assert_eq!(v["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_optional_body_accepts_empty_and_rejects_garbage() {
        let empty = OptionalApiJson::<Reading>::from_request(post(""), &())
            .await
            .expect("empty body is allowed");
        assert!(empty.0.is_none());

        let parsed = OptionalApiJson::<Reading>::from_request(post(r#"{"value": 2.5}"#), &())
            .await
            .expect("valid body");
        assert_eq!(parsed.0.map(|p| p.value), Some(2.5));

        let err = OptionalApiJson::<Reading>::from_request(post("{ nope"), &())
            .await
            .expect_err("malformed");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
