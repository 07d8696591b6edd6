//! Load shedding for handler invocations.
//!
//! The pipeline stacks tower's `LoadShed` over `ConcurrencyLimit`: once
//! `max_concurrent_handlers` invocations hold a permit, the next call fails
//! at once instead of waiting. Those layers speak `BoxError`; this module
//! folds their errors back into [`HandlerError`].

use tower::load_shed::error::Overloaded;
use tower::BoxError;

use crate::service::handler::HandlerError;

/// Maps an error surfaced by the shedding layers to a `HandlerError`.
///
/// A shed call becomes `HandlerError::Overloaded`; errors from the wrapped
/// pipeline pass through unchanged.
pub fn into_handler_error(error: BoxError) -> HandlerError {
    if error.is::<Overloaded>() {
        return HandlerError::Overloaded;
    }
    match error.downcast::<HandlerError>() {
        Ok(error) => *error,
        Err(other) => HandlerError::Failed(anyhow::anyhow!(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use bytes::Bytes;
    use tower::{Service, ServiceBuilder, ServiceExt};

    use super::*;
    use crate::network::ChannelId;
    use crate::service::handler::{HandlerRequest, HandlerResponse};

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

        fn call(&mut self, req: HandlerRequest) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                if req.destination == "reject" {
                    Err(HandlerError::NoHandler {
                        destination: req.destination,
                    })
                } else {
                    Ok(None)
                }
            })
        }
    }

    fn request(destination: &str) -> HandlerRequest {
        HandlerRequest {
            call_id: 7,
            channel: ChannelId(1),
            destination: destination.to_string(),
            body: Bytes::new(),
            timeout_ms: 5000,
        }
    }

    #[test]
    fn overloaded_maps_to_handler_error() {
        let err = into_handler_error(Box::new(Overloaded::new()));
        assert!(matches!(err, HandlerError::Overloaded));
    }

    #[test]
    fn handler_errors_pass_through() {
        let err = into_handler_error(Box::new(HandlerError::Timeout { timeout_ms: 3 }));
        assert!(matches!(err, HandlerError::Timeout { timeout_ms: 3 }));
    }

    #[test]
    fn foreign_errors_become_failures() {
        let err = into_handler_error("socket hiccup".into());
        assert!(matches!(err, HandlerError::Failed(_)));
        assert!(err.to_string().contains("socket hiccup"));
    }

    #[tokio::test]
    async fn sheds_calls_beyond_the_limit() {
        let mut svc = ServiceBuilder::new()
            .map_err(into_handler_error)
            .load_shed()
            .concurrency_limit(1)
            .service(SlowService { delay_ms: 500 });

        ServiceExt::<HandlerRequest>::ready(&mut svc).await.unwrap();
        let running = tokio::spawn(svc.call(request("work")));

        ServiceExt::<HandlerRequest>::ready(&mut svc).await.unwrap();
        let err = svc.call(request("work")).await.unwrap_err();
        assert!(matches!(err, HandlerError::Overloaded));

        running.abort();
    }

    #[tokio::test]
    async fn inner_errors_survive_the_stack() {
        let svc = ServiceBuilder::new()
            .map_err(into_handler_error)
            .load_shed()
            .concurrency_limit(4)
            .service(SlowService { delay_ms: 1 });

        let err = svc.oneshot(request("reject")).await.unwrap_err();
        assert!(matches!(err, HandlerError::NoHandler { .. }));
    }
}
