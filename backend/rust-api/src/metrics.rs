use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    pub static ref SSE_CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        "sse_connections_active",
        "Number of active SSE connections"
    )
    .unwrap();

    // Session Metrics
    pub static ref SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "proctor_sessions_total",
        "Proctored sessions by lifecycle outcome",
        &["status"]
    )
    .unwrap();

    pub static ref SESSIONS_ACTIVE: IntGauge = register_int_gauge!(
        "proctor_sessions_active",
        "Number of sessions currently in the active state"
    )
    .unwrap();

    pub static ref VIOLATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "proctor_violations_total",
        "Violations recorded across all sessions",
        &["kind"]
    )
    .unwrap();

    pub static ref RESOURCE_ACQUISITIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "proctor_resource_acquisitions_total",
        "Capture device and fullscreen acquisition attempts",
        &["resource", "result"]
    )
    .unwrap();

    pub static ref REPORTS_SUBMITTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "proctor_reports_submitted_total",
        "Reports handed to the submission sink",
        &["outcome"]
    )
    .unwrap();

    pub static ref REPORT_SUBMISSION_DURATION_SECONDS: Histogram = register_histogram!(
        "proctor_report_submission_duration_seconds",
        "Time spent handing a report to the submission sink",
        vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Supervisor Metrics
    pub static ref SNAPSHOTS_INGESTED_TOTAL: IntCounter = register_int_counter!(
        "proctor_snapshots_ingested_total",
        "Participant snapshots ingested by the monitoring aggregators"
    )
    .unwrap();

    pub static ref SUPERVISOR_COMMANDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "proctor_supervisor_commands_total",
        "Supervisor commands dispatched to sessions",
        &["command"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track a report submission with metrics
pub async fn track_submission<F, T, E>(future: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    REPORT_SUBMISSION_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());

    let outcome = if result.is_ok() {
        "acknowledged"
    } else {
        "failed"
    };
    REPORTS_SUBMITTED_TOTAL.with_label_values(&[outcome]).inc();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registration() {
        let _ = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/health", "200"])
            .get();
        let _ = VIOLATIONS_TOTAL.with_label_values(&["tab_switch"]).get();
    }

    #[test]
    fn test_render_metrics() {
        HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/test", "200"])
            .inc();
        SNAPSHOTS_INGESTED_TOTAL.inc();

        let output = render_metrics().unwrap();
        assert!(output.contains("http_requests_total"));
        assert!(output.contains("proctor_snapshots_ingested_total"));
    }

    #[tokio::test]
    async fn test_track_submission_counts_outcome() {
        let before = REPORTS_SUBMITTED_TOTAL
            .with_label_values(&["failed"])
            .get();
        let result: Result<(), &str> = track_submission(async { Err("down") }).await;
        assert!(result.is_err());
        assert!(REPORTS_SUBMITTED_TOTAL.with_label_values(&["failed"]).get() > before);
    }
}
