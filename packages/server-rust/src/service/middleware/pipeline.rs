//! Pipeline composition: wraps the handler router in every middleware layer.

use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use super::load_shed::into_handler_error;
use super::metrics::MetricsLayer;
use super::timeout::TimeoutLayer;
use crate::service::config::DispatcherConfig;
use crate::service::handler::{HandlerError, HandlerRequest, HandlerResponse};
use crate::service::router::HandlerRouter;

/// The composed, type-erased handler pipeline. Cheap to clone per invocation.
pub type HandlerPipeline = BoxCloneService<HandlerRequest, HandlerResponse, HandlerError>;

/// Builds the handler pipeline.
///
/// Layer order (outermost to innermost):
/// 1. `map_err` folds tower's boxed errors back into `HandlerError`
/// 2. `load_shed` + `concurrency_limit` reject when `max_concurrent_handlers`
///    are busy; clones share one semaphore
/// 3. `TimeoutLayer` enforces the request's `timeout_ms`
/// 4. `MetricsLayer` records duration and outcome
#[must_use]
pub fn build_handler_pipeline(router: HandlerRouter, config: &DispatcherConfig) -> HandlerPipeline {
    BoxCloneService::new(
        ServiceBuilder::new()
            .map_err(into_handler_error)
            .load_shed()
            .concurrency_limit(config.max_concurrent_handlers as usize)
            .layer(TimeoutLayer)
            .layer(MetricsLayer)
            .service(router),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tower::ServiceExt;

    use super::*;
    use crate::network::ChannelId;
    use crate::service::handler::Reply;

    fn request(destination: &str, timeout_ms: u64) -> HandlerRequest {
        HandlerRequest {
            call_id: 1,
            channel: ChannelId(1),
            destination: destination.to_string(),
            body: Bytes::from_static(b"body"),
            timeout_ms,
        }
    }

    fn router() -> HandlerRouter {
        let mut router = HandlerRouter::new();
        router
            .register_fn("echo", |req: HandlerRequest| async move {
                Ok(Some(Reply::new("/topic/echo", req.body)))
            })
            .register_fn("slow", |_req: HandlerRequest| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(None)
            });
        router
    }

    #[tokio::test]
    async fn routes_through_all_layers() {
        let svc = build_handler_pipeline(router(), &DispatcherConfig::default());
        let reply = svc.oneshot(request("echo", 1000)).await.unwrap().unwrap();
        assert_eq!(reply.destination, "/topic/echo");
        assert_eq!(reply.body, Bytes::from_static(b"body"));
    }

    #[tokio::test]
    async fn timeout_applies_to_routed_handler() {
        let svc = build_handler_pipeline(router(), &DispatcherConfig::default());
        let err = svc.oneshot(request("slow", 20)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Timeout { timeout_ms: 20 }));
    }

    #[tokio::test]
    async fn clones_share_the_concurrency_limit() {
        let config = DispatcherConfig {
            max_concurrent_handlers: 1,
            ..DispatcherConfig::default()
        };
        let svc = build_handler_pipeline(router(), &config);

        let running = tokio::spawn(svc.clone().oneshot(request("slow", 5000)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = svc.oneshot(request("echo", 1000)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Overloaded));
        running.abort();
    }
}
