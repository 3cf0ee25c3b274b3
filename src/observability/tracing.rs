//! Correlation and trace context propagation.
//!
//! # Responsibilities
//! - Extract correlation ID and trace headers from inbound requests
//! - Carry them through the task handling the request
//! - Hand them to every outbound call made from that task
//!
//! # Design Decisions
//! - Task-local scope instead of threading a context through every signature
//! - Outside a scope each call mints a fresh UUID v4 correlation ID

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::future::Future;
use uuid::Uuid;

/// Header carrying the correlation ID on every outbound request.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Read as a correlation ID when `x-correlation-id` is absent.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Trace headers copied verbatim from inbound to outbound requests.
pub const TRACE_HEADERS: &[&str] = &[
    "traceparent",
    "tracestate",
    "baggage",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
    "x-cloud-trace-context",
];

/// Context of the inbound request being served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundContext {
    pub correlation_id: Option<String>,
    pub trace_headers: Vec<(String, String)>,
}

impl InboundContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: Some(correlation_id.into()),
            trace_headers: Vec::new(),
        }
    }

    pub fn with_trace_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.trace_headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let correlation_id = read(CORRELATION_ID_HEADER).or_else(|| read(REQUEST_ID_HEADER));
        let trace_headers = TRACE_HEADERS
            .iter()
            .filter_map(|name| read(name).map(|value| (name.to_string(), value)))
            .collect();

        Self {
            correlation_id,
            trace_headers,
        }
    }
}

tokio::task_local! {
    static INBOUND: InboundContext;
}

/// Run `fut` with `ctx` as the inbound context.
pub async fn with_inbound<F>(ctx: InboundContext, fut: F) -> F::Output
where
    F: Future,
{
    INBOUND.scope(ctx, fut).await
}

/// Inbound context of the current task, if inside a scope.
pub fn current_inbound() -> Option<InboundContext> {
    INBOUND.try_with(Clone::clone).ok()
}

/// Correlation ID for an outbound call: inherited, or freshly minted.
pub fn correlation_id_or_new(inbound: Option<&InboundContext>) -> String {
    inbound
        .and_then(|ctx| ctx.correlation_id.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Axum middleware scoping each request's handler in its inbound context.
pub async fn propagate_inbound_context(request: Request, next: Next) -> Response {
    let ctx = InboundContext::from_headers(request.headers());
    with_inbound(ctx, next.run(request)).await
}
