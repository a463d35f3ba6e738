use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::{
    handlers::{session_error, validation_error},
    models::*,
    services::{client_bridge::ClientGrants, session_registry::SessionEntry, AppState},
    utils::time::format_countdown,
};

#[derive(Debug, Default, Deserialize)]
pub struct ConsentRequest {
    #[serde(default)]
    pub grants: ClientGrants,
}

#[derive(Debug, Deserialize)]
pub struct ToggleChoiceRequest {
    pub option: usize,
}

#[derive(Debug, Deserialize)]
pub struct NavigateRequest {
    pub index: usize,
}

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    /// Capture time on the client; defaults to arrival time.
    #[serde(default)]
    pub at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: SignalKind,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SampleUpload {
    pub device: DeviceKind,
    #[validate(length(min = 1, message = "Content type must not be empty"))]
    pub content_type: String,
    /// Base64-encoded image or audio bytes.
    #[validate(length(min = 1, message = "Sample data must not be empty"))]
    pub data: String,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeviceLostRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionViewResponse {
    #[serde(flatten)]
    pub view: SessionView,
    pub countdown: String,
}

impl From<SessionView> for SessionViewResponse {
    fn from(view: SessionView) -> Self {
        let countdown = format_countdown(view.remaining_seconds);
        Self { view, countdown }
    }
}

fn find_session(state: &AppState, session_id: &str) -> Result<SessionEntry, (StatusCode, String)> {
    state
        .sessions
        .get(session_id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Session not found".to_string()))
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<SessionSpec>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!(
        "Creating session for participant_id={}, test_id={}",
        spec.participant_id,
        spec.test_id
    );

    spec.validate().map_err(validation_error)?;

    let response = CreateSessionResponse {
        session_id: String::new(),
        status: SessionStatus::Unconsented,
        duration_seconds: spec.duration_seconds,
        total_questions: spec.questions.len(),
    };
    let entry = state.start_session(spec);

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: entry.handle.session_id().to_string(),
            ..response
        }),
    ))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id)?;
    Ok(Json(SessionViewResponse::from(entry.handle.view())))
}

pub async fn consent(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Option<Json<ConsentRequest>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Consent received: session={}", session_id);

    let entry = find_session(&state, &session_id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    entry.bridge.set_grants(req.grants);

    entry.handle.consent().await.map_err(|e| {
        tracing::warn!("Consent failed: session={}, error={}", session_id, e);
        session_error(e)
    })?;

    Ok(Json(SessionViewResponse::from(entry.handle.view())))
}

pub async fn record_response(
    State(state): State<Arc<AppState>>,
    Path((session_id, question_id)): Path<(String, String)>,
    Json(value): Json<ResponseValue>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id)?;
    entry
        .handle
        .record_response(question_id, value)
        .await
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn toggle_choice(
    State(state): State<Arc<AppState>>,
    Path((session_id, question_id)): Path<(String, String)>,
    Json(req): Json<ToggleChoiceRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id)?;
    entry
        .handle
        .toggle_choice(question_id, req.option)
        .await
        .map_err(session_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn navigate(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<NavigateRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id)?;
    let index = entry
        .handle
        .navigate(req.index)
        .await
        .map_err(session_error)?;
    Ok(Json(serde_json::json!({ "current_question_index": index })))
}

/// Client-side environment event. The response tells the client whether to
/// block the event's default action.
pub async fn post_signal(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<SignalRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id)?;
    let signal = EnvironmentSignal::at(req.kind, req.at.unwrap_or_else(Utc::now));
    tracing::debug!("Signal received: session={}, signal={:?}", session_id, signal.kind);

    let disposition = entry.bridge.post_signal(&signal);
    Ok(Json(serde_json::json!({ "disposition": disposition })))
}

pub async fn post_sample(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(req): Json<SampleUpload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    req.validate().map_err(validation_error)?;
    let entry = find_session(&state, &session_id)?;

    let payload = general_purpose::STANDARD
        .decode(req.data.as_bytes())
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid sample data: {}", e)))?;

    entry.bridge.post_sample(CaptureSample {
        device: req.device,
        captured_at: req.captured_at.unwrap_or_else(Utc::now),
        content_type: req.content_type,
        payload,
    });
    Ok(StatusCode::ACCEPTED)
}

pub async fn device_lost(
    State(state): State<Arc<AppState>>,
    Path((session_id, device)): Path<(String, DeviceKind)>,
    body: Option<Json<DeviceLostRequest>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id)?;
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let reason = req
        .reason
        .unwrap_or_else(|| "device stopped by the client".to_string());

    tracing::warn!(
        "Client reported device loss: session={}, device={}, reason={}",
        session_id,
        device.as_str(),
        reason
    );
    entry.bridge.report_device_lost(device, reason);
    Ok(StatusCode::ACCEPTED)
}

pub async fn fullscreen_exit(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = find_session(&state, &session_id)?;
    entry.bridge.report_fullscreen_exit(Utc::now());
    Ok(StatusCode::ACCEPTED)
}

pub async fn submit(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Submitting session: {}", session_id);

    let entry = find_session(&state, &session_id)?;
    let outcome = entry.handle.submit().await.map_err(session_error)?;
    Ok(Json(outcome))
}

/// The test-taker navigated away. The partial report is still submitted.
pub async fn abandon(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    tracing::info!("Session abandoned by client: {}", session_id);

    let entry = find_session(&state, &session_id)?;
    let outcome = entry.handle.abandon().await.map_err(session_error)?;
    Ok(Json(outcome))
}

pub async fn get_report(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .reports
        .get(&session_id)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Report not found".to_string()))
}
