use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Span;
use uuid::Uuid;

pub fn generate_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn generate_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

/// Injects (or reuses) an `X-Request-Id` header and opens an
/// `info_span!` for the request, so every log line emitted while
/// handling it carries the same request ID.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(generate_trace_id);

    let span = tracing::info_span!("http_request", request_id = %request_id, path = %request.uri().path());
    let _enter = span.enter();

    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        request.headers_mut().insert("x-request-id", header_value.clone());
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-request-id", header_value);
        return response;
    }

    next.run(request).await
}

pub fn create_operation_span(operation: &str) -> Span {
    tracing::info_span!("operation", name = %operation, trace_id = %generate_trace_id())
}

pub fn create_child_span(parent: &Span, operation: &str) -> Span {
    let _entered = parent.enter();
    tracing::info_span!(parent: parent, "operation", name = %operation, span_id = %generate_span_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_ids_are_unique() {
        assert_ne!(generate_trace_id(), generate_trace_id());
    }

    #[test]
    fn span_ids_have_expected_length() {
        assert_eq!(generate_span_id().len(), 16);
    }

    #[test]
    fn operation_span_is_constructible() {
        let span = create_operation_span("test_op");
        assert!(!span.is_disabled() || span.is_disabled());
    }

    #[test]
    fn child_span_is_constructible() {
        let parent = create_operation_span("parent_op");
        let child = create_child_span(&parent, "child_op");
        assert!(!child.is_disabled() || child.is_disabled());
    }
}
