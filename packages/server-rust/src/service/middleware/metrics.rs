//! Instrumentation middleware for handler invocations.
//!
//! Wraps each invocation in an `info_span!` and records its duration and
//! outcome as span fields plus one completion event.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::handler::{HandlerError, HandlerRequest, HandlerResponse};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

fn outcome_label(result: &Result<HandlerResponse, HandlerError>) -> &'static str {
    match result {
        Ok(Some(_)) => "reply",
        Ok(None) => "no_reply",
        Err(HandlerError::Timeout { .. }) => "timeout",
        Err(HandlerError::Overloaded) => "overloaded",
        Err(HandlerError::NoHandler { .. }) => "no_handler",
        Err(_) => "error",
    }
}

impl<S> Service<HandlerRequest> for MetricsService<S>
where
    S: Service<HandlerRequest, Response = HandlerResponse, Error = HandlerError> + Send,
    S::Future: Send + 'static,
{
    type Response = HandlerResponse;
    type Error = HandlerError;
    type Future = Pin<Box<dyn Future<Output = Result<HandlerResponse, HandlerError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: HandlerRequest) -> Self::Future {
        let call_id = req.call_id;
        let span = info_span!(
            "handler",
            destination = %req.destination,
            channel = %req.channel,
            call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
                let outcome = outcome_label(&result);

                let span = tracing::Span::current();
                span.record("duration_ms", duration_ms);
                span.record("outcome", outcome);

                tracing::info!(call_id, duration_ms, outcome, "handler complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tower::{service_fn, ServiceExt};

    use super::*;
    use crate::network::ChannelId;
    use crate::service::handler::Reply;

    #[tokio::test]
    async fn passes_response_through() {
        let svc = MetricsLayer.layer(service_fn(|req: HandlerRequest| async move {
            Ok::<_, HandlerError>(Some(Reply::new("/topic/echo", req.body)))
        }));

        let req = HandlerRequest {
            call_id: 42,
            channel: ChannelId(3),
            destination: "echo".to_string(),
            body: Bytes::from_static(b"ping"),
            timeout_ms: 5000,
        };
        let reply = svc.oneshot(req).await.unwrap().unwrap();
        assert_eq!(reply.body, Bytes::from_static(b"ping"));
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(outcome_label(&Ok(None)), "no_reply");
        assert_eq!(outcome_label(&Err(HandlerError::Overloaded)), "overloaded");
        assert_eq!(outcome_label(&Err(HandlerError::Timeout { timeout_ms: 1 })), "timeout");
        assert_eq!(
            outcome_label(&Err(HandlerError::Failed(anyhow::anyhow!("boom")))),
            "error"
        );
    }
}
