use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use validator::Validate;

use crate::{
    handlers::validation_error,
    models::{ParticipantQuery, ParticipantSnapshot, SupervisorCommand},
    services::{monitoring_service::MonitoringAggregator, AppState},
    utils::time::format_remaining,
};

#[derive(Debug, Serialize)]
pub struct ParticipantRow {
    #[serde(flatten)]
    pub snapshot: ParticipantSnapshot,
    pub remaining_display: String,
}

fn find_test(
    state: &AppState,
    test_id: &str,
) -> Result<Arc<MonitoringAggregator>, (StatusCode, String)> {
    state
        .board
        .find(test_id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Test not found".to_string()))
}

pub async fn list_participants(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
    Query(query): Query<ParticipantQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let aggregator = find_test(&state, &test_id)?;
    let rows: Vec<ParticipantRow> = aggregator
        .query(&query)
        .into_iter()
        .map(|snapshot| ParticipantRow {
            remaining_display: format_remaining(snapshot.remaining_seconds),
            snapshot,
        })
        .collect();
    Ok(Json(rows))
}

pub async fn get_participant(
    State(state): State<Arc<AppState>>,
    Path((test_id, participant_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let aggregator = find_test(&state, &test_id)?;
    aggregator
        .select_detail(&participant_id)
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Participant not found".to_string()))
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let aggregator = find_test(&state, &test_id)?;
    Ok(Json(aggregator.overview()))
}

pub async fn violation_feed(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let aggregator = find_test(&state, &test_id)?;
    Ok(Json(aggregator.violation_feed()))
}

pub async fn send_command(
    State(state): State<Arc<AppState>>,
    Path((test_id, participant_id)): Path<(String, String)>,
    Json(command): Json<SupervisorCommand>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let SupervisorCommand::Message { text } = &command {
        if text.trim().is_empty() {
            return Err((StatusCode::BAD_REQUEST, "Message must not be empty".to_string()));
        }
    }

    let aggregator = find_test(&state, &test_id)?;
    if aggregator.select_detail(&participant_id).is_none() {
        return Err((StatusCode::NOT_FOUND, "Participant not found".to_string()));
    }

    aggregator.dispatch(&participant_id, command);
    Ok(StatusCode::ACCEPTED)
}

/// Snapshot pushed by a session running outside this process.
pub async fn ingest_snapshot(
    State(state): State<Arc<AppState>>,
    Path(test_id): Path<String>,
    Json(snapshot): Json<ParticipantSnapshot>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    snapshot.validate().map_err(validation_error)?;
    tracing::debug!(
        "Snapshot ingested: test={}, participant={}",
        test_id,
        snapshot.participant_id
    );
    state.board.aggregator(&test_id).ingest(snapshot);
    Ok(StatusCode::ACCEPTED)
}
