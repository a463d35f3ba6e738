use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

#[derive(Clone, Debug)]
pub struct RequestTraceContext {
    pub trace_id: String,
}

fn trace_header(trace_id: &str) -> Option<(HeaderName, HeaderValue)> {
    HeaderValue::from_str(trace_id)
        .ok()
        .map(|value| (HeaderName::from_static(TRACE_ID_HEADER), value))
}

/// Propagates `x-trace-id` (or mints one) so session logs can be correlated
/// with the client request that caused them.
pub async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let incoming = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let minted = incoming.is_none();
    let trace_id = incoming.unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(RequestTraceContext {
        trace_id: trace_id.clone(),
    });
    if minted {
        if let Some((name, value)) = trace_header(&trace_id) {
            request.headers_mut().insert(name, value);
        }
    }

    tracing::debug!(
        "{} {} trace_id={}",
        request.method(),
        request.uri().path(),
        trace_id
    );

    let mut response = next.run(request).await;

    if !response.headers().contains_key(TRACE_ID_HEADER) {
        if let Some((name, value)) = trace_header(&trace_id) {
            response.headers_mut().insert(name, value);
        }
    }

    response
}
