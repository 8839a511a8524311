use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub static TRACE_ID_HEADER: HeaderName = HeaderName::from_static("x-trace-id");

const MAX_TRACE_ID_LEN: usize = 128;

/// Trace id of the current request, available to handlers via extensions.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

/// Accepts a caller-supplied id only if it is short and printable.
fn accept_trace_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= MAX_TRACE_ID_LEN
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    valid.then(|| trimmed.to_string())
}

/// Tags the request with an `x-trace-id`, runs it inside a span carrying that
/// id and echoes the id on the response.
pub async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(&TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(accept_trace_id)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request.extensions_mut().insert(TraceId(trace_id.clone()));

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER.clone(), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_well_formed_ids() {
        assert_eq!(accept_trace_id("abc-123_x.y"), Some("abc-123_x.y".to_string()));
        assert_eq!(accept_trace_id("  padded  "), Some("padded".to_string()));
    }

    #[test]
    fn test_rejects_garbage() {
        assert_eq!(accept_trace_id(""), None);
        assert_eq!(accept_trace_id("has space"), None);
        assert_eq!(accept_trace_id(&"a".repeat(MAX_TRACE_ID_LEN + 1)), None);
    }
}
