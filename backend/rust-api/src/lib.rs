use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        // Metrics endpoint with Basic Auth protection
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1/sessions", sessions_routes())
        .nest("/api/v1/monitor", monitor_routes())
        .with_state(app_state)
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::sessions::create_session))
        .route("/{id}", get(handlers::sessions::get_session))
        .route("/{id}/consent", post(handlers::sessions::consent))
        .route(
            "/{id}/responses/{question_id}",
            put(handlers::sessions::record_response),
        )
        .route(
            "/{id}/responses/{question_id}/toggle",
            post(handlers::sessions::toggle_choice),
        )
        .route("/{id}/navigate", post(handlers::sessions::navigate))
        .route("/{id}/signals", post(handlers::sessions::post_signal))
        .route("/{id}/samples", post(handlers::sessions::post_sample))
        .route(
            "/{id}/devices/{device}/lost",
            post(handlers::sessions::device_lost),
        )
        .route(
            "/{id}/fullscreen-exit",
            post(handlers::sessions::fullscreen_exit),
        )
        .route("/{id}/submit", post(handlers::sessions::submit))
        .route("/{id}/abandon", post(handlers::sessions::abandon))
        .route("/{id}/report", get(handlers::sessions::get_report))
        .route("/{id}/stream", get(handlers::sse::session_stream))
}

fn monitor_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{test_id}/participants",
            get(handlers::monitor::list_participants),
        )
        .route(
            "/{test_id}/participants/{participant_id}",
            get(handlers::monitor::get_participant),
        )
        .route(
            "/{test_id}/participants/{participant_id}/commands",
            post(handlers::monitor::send_command),
        )
        .route("/{test_id}/overview", get(handlers::monitor::overview))
        .route(
            "/{test_id}/violations",
            get(handlers::monitor::violation_feed),
        )
        .route(
            "/{test_id}/snapshots",
            post(handlers::monitor::ingest_snapshot),
        )
}
