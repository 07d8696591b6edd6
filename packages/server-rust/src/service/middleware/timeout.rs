//! Timeout middleware for handler invocations.
//!
//! Fails invocations that run past their `timeout_ms` with `HandlerError::Timeout`.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::service::handler::{HandlerError, HandlerRequest, HandlerResponse};

// ---------------------------------------------------------------------------
// TimeoutLayer
// ---------------------------------------------------------------------------

/// Tower layer that enforces each request's own `timeout_ms`.
#[derive(Debug, Clone)]
pub struct TimeoutLayer;

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner }
    }
}

// ---------------------------------------------------------------------------
// TimeoutService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
}

impl<S> Service<HandlerRequest> for TimeoutService<S>
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
        let timeout_ms = req.timeout_ms;
        let fut = self.inner.call(req);
        Box::pin(async move {
            match tokio::time::timeout(Duration::from_millis(timeout_ms), fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(HandlerError::Timeout { timeout_ms }),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tower::ServiceExt;

    use super::*;
    use crate::network::ChannelId;
    use crate::service::handler::Reply;

    fn request(timeout_ms: u64) -> HandlerRequest {
        HandlerRequest {
            call_id: 1,
            channel: ChannelId(1),
            destination: "slow".to_string(),
            body: Bytes::new(),
            timeout_ms,
        }
    }

    /// Service that sleeps before replying.
    struct SlowService {
        delay_ms: u64,
    }

    impl Service<HandlerRequest> for SlowService {
        type Response = HandlerResponse;
        type Error = HandlerError;
        type Future =
            Pin<Box<dyn Future<Output = Result<HandlerResponse, HandlerError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _req: HandlerRequest) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(Some(Reply::new("/topic/done", "ok")))
            })
        }
    }

    fn slow(delay_ms: u64) -> SlowService {
        SlowService { delay_ms }
    }

    #[tokio::test]
    async fn completes_within_timeout() {
        let svc = TimeoutLayer.layer(slow(10));
        let reply = svc.oneshot(request(1000)).await.unwrap();
        assert!(reply.is_some());
    }

    #[tokio::test]
    async fn exceeding_timeout_is_an_error() {
        let svc = TimeoutLayer.layer(slow(200));
        let err = svc.oneshot(request(50)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { timeout_ms: 50 }));
    }
}
