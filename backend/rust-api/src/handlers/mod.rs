use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::services::session_service::SessionError;
use crate::services::AppState;

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "proctor-api",
            "version": env!("CARGO_PKG_VERSION"),
            "sessions": state.sessions.len(),
            "reports": state.reports.len(),
            "submission_forwarding": state.config.submission_url.is_some(),
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Metrics authentication middleware - protects /metrics endpoint with HTTP Basic Auth
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    // Format: username:password
    let expected = std::env::var("METRICS_AUTH").unwrap_or_else(|_| "admin:changeme".to_string());

    if credentials != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

/// Maps engine errors onto HTTP status codes.
pub(crate) fn session_error(e: SessionError) -> (StatusCode, String) {
    let status = match &e {
        SessionError::IllegalState { .. } => StatusCode::CONFLICT,
        SessionError::UnknownQuestion(_) => StatusCode::NOT_FOUND,
        SessionError::ResponseMismatch { .. }
        | SessionError::ChoiceOutOfRange { .. }
        | SessionError::NavigationOutOfRange { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::CannotStart(_) => StatusCode::PRECONDITION_FAILED,
        SessionError::SessionGone => StatusCode::GONE,
    };
    (status, e.to_string())
}

pub(crate) fn validation_error(e: validator::ValidationErrors) -> (StatusCode, String) {
    (StatusCode::BAD_REQUEST, format!("Validation error: {}", e))
}

pub mod monitor;
pub mod sessions;
pub mod sse;
