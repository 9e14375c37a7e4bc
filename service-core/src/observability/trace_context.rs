//! W3C trace context for calls to external providers.
//!
//! Outbound requests to the payment and transcription providers carry the
//! current span as a `traceparent` header so provider-side logs can be joined
//! back to the originating request.

use opentelemetry::trace::TraceContextExt;
use reqwest::header::{HeaderMap, HeaderValue};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const TRACEPARENT_HEADER: &str = "traceparent";

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Formats the current span as `00-<trace_id>-<span_id>-<flags>`.
fn current_traceparent() -> Option<String> {
    let context = Span::current().context();
    let span = context.span();
    let span_context = span.span_context();

    span_context.is_valid().then(|| {
        format!(
            "00-{}-{}-{:02x}",
            span_context.trace_id(),
            span_context.span_id(),
            span_context.trace_flags().to_u8()
        )
    })
}

/// Headers to attach to an outbound provider call.
pub fn outbound_headers(request_id: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Some(value) = current_traceparent().and_then(|tp| HeaderValue::from_str(&tp).ok()) {
        headers.insert(TRACEPARENT_HEADER, value);
    }

    if let Some(value) = request_id.and_then(|id| HeaderValue::from_str(id).ok()) {
        headers.insert(REQUEST_ID_HEADER, value);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_active_span_yields_no_traceparent() {
        let headers = outbound_headers(None);
        assert!(headers.get(TRACEPARENT_HEADER).is_none());
    }

    #[test]
    fn test_request_id_forwarded() {
        let headers = outbound_headers(Some("req-42"));
        assert_eq!(headers.get(REQUEST_ID_HEADER).unwrap(), "req-42");
    }
}
