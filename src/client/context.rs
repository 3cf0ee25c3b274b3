//! Per-call request context.

use std::time::Duration;

use crate::observability::tracing::{correlation_id_or_new, current_inbound, CORRELATION_ID_HEADER};
use crate::resilience::Deadline;

/// State carried across the attempts of one call.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: String,
    pub trace_headers: Vec<(String, String)>,
    pub retry_count: u32,
    pub deadline: Deadline,
    pub skip_circuit_breaker: bool,
}

impl RequestContext {
    /// Context inheriting the current task's inbound correlation and trace.
    pub fn new(deadline: Option<Duration>, skip_circuit_breaker: bool) -> Self {
        let inbound = current_inbound();
        Self {
            correlation_id: correlation_id_or_new(inbound.as_ref()),
            trace_headers: inbound.map(|ctx| ctx.trace_headers).unwrap_or_default(),
            retry_count: 0,
            deadline: Deadline::from_option(deadline),
            skip_circuit_breaker,
        }
    }

    /// Headers stamped on every attempt.
    pub fn propagation_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::with_capacity(self.trace_headers.len() + 1);
        headers.push((CORRELATION_ID_HEADER.to_string(), self.correlation_id.clone()));
        headers.extend(self.trace_headers.iter().cloned());
        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::tracing::{with_inbound, InboundContext};

    #[tokio::test]
    async fn test_inherits_inbound_scope() {
        let inbound = InboundContext::new("corr-7").with_trace_header("traceparent", "00-a-b-01");
        let ctx = with_inbound(inbound, async { RequestContext::new(None, false) }).await;

        assert_eq!(ctx.correlation_id, "corr-7");
        assert_eq!(
            ctx.propagation_headers(),
            vec![
                ("x-correlation-id".to_string(), "corr-7".to_string()),
                ("traceparent".to_string(), "00-a-b-01".to_string()),
            ]
        );
    }

    #[test]
    fn test_fresh_context() {
        let ctx = RequestContext::new(None, true);
        assert!(!ctx.correlation_id.is_empty());
        assert!(ctx.trace_headers.is_empty());
        assert_eq!(ctx.retry_count, 0);
        assert!(ctx.skip_circuit_breaker);
    }
}
