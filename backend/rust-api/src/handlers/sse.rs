use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
};
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;

use crate::{
    metrics::SSE_CONNECTIONS_ACTIVE,
    models::{SessionStatus, SessionView, TerminationReason, TimeExpired, TimerEvent, TimerTick},
    services::AppState,
};

pub const SESSION_STATE_EVENT: &str = "session-state";

/// SSE endpoint for session state and timer events
/// GET /api/v1/sessions/{id}/stream
pub async fn session_stream(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Session not found".to_string()))?;

    tracing::info!("Client connected to SSE stream: session={}", session_id);
    let stream = view_stream(entry.handle.subscribe());

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

struct ConnectionGuard;

impl ConnectionGuard {
    fn open() -> Self {
        SSE_CONNECTIONS_ACTIVE.inc();
        ConnectionGuard
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        SSE_CONNECTIONS_ACTIVE.dec();
    }
}

struct StreamState {
    views: watch::Receiver<SessionView>,
    last_remaining: Option<u32>,
    started: bool,
    finished: bool,
    _guard: ConnectionGuard,
}

/// One `session-state` event per published view, plus `timer-tick` whenever
/// the countdown moved and a final `time-expired` on expiry. Ends after the
/// session terminates.
fn view_stream(
    views: watch::Receiver<SessionView>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = StreamState {
        views,
        last_remaining: None,
        started: false,
        finished: false,
        _guard: ConnectionGuard::open(),
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        if state.started {
            state.views.changed().await.ok()?;
        }
        state.started = true;

        let view = state.views.borrow_and_update().clone();
        let events = events_for(&view, state.last_remaining);
        state.last_remaining = Some(view.remaining_seconds);
        state.finished = view.status == SessionStatus::Terminated;

        Some((stream::iter(events.into_iter().map(Ok)), state))
    })
    .flatten()
}

fn events_for(view: &SessionView, last_remaining: Option<u32>) -> Vec<Event> {
    let mut events = Vec::with_capacity(2);

    let data = serde_json::to_string(view).unwrap_or_else(|_| "{}".to_string());
    events.push(Event::default().event(SESSION_STATE_EVENT).data(data));

    let timer_event = match view.status {
        SessionStatus::Active if last_remaining != Some(view.remaining_seconds) => {
            Some(TimerEvent::TimerTick(TimerTick {
                remaining_seconds: view.remaining_seconds,
                elapsed_seconds: view.duration_seconds.saturating_sub(view.remaining_seconds),
                total_seconds: view.duration_seconds,
                timestamp: Utc::now(),
            }))
        }
        SessionStatus::Terminated if view.termination == Some(TerminationReason::Expired) => {
            Some(TimerEvent::TimeExpired(TimeExpired {
                total_seconds: view.duration_seconds,
                timestamp: Utc::now(),
                message: "Time limit exceeded".to_string(),
            }))
        }
        _ => None,
    };

    if let Some(timer_event) = timer_event {
        events.push(
            Event::default()
                .event(timer_event.event_name())
                .data(timer_event.to_sse_data()),
        );
    }
    events
}
