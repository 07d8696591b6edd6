//! Application dispatcher: runs the handler for a client SEND and publishes
//! its reply through the broker.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::FutureExt;
use parking_lot::Mutex;
use relay_core::{Frame, Route};
use thiserror::Error;
use tower::ServiceExt;
use tracing::{debug, warn};

use super::config::DispatcherConfig;
use super::handler::{HandlerError, HandlerRequest, HandlerResponse};
use super::middleware::{build_handler_pipeline, HandlerPipeline};
use super::router::HandlerRouter;
use crate::broker::{Broker, PublishReport};
use crate::network::{ChannelId, ChannelManager, ChannelState};

/// Reasons a SEND could not be handed to a handler at all.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("{destination:?} is not an application destination")]
    NotApplicationDestination { destination: String },

    #[error("no handler registered for {destination:?}")]
    NoHandler { destination: String },

    #[error("handler task was cancelled")]
    Aborted,
}

/// What happened to a dispatched SEND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The reply was published.
    Published(PublishReport),
    /// The handler completed without a reply.
    NoReply,
    /// The origin channel closed before the reply was ready.
    Discarded,
    /// The handler or the reply publish failed; an ERROR frame went to the origin.
    Failed,
}

/// Routes application SENDs to handlers.
pub struct Dispatcher {
    pipeline: Mutex<HandlerPipeline>,
    destinations: HashSet<String>,
    broker: Arc<Broker>,
    channels: Arc<ChannelManager>,
    config: DispatcherConfig,
    next_call_id: AtomicU64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        router: HandlerRouter,
        broker: Arc<Broker>,
        channels: Arc<ChannelManager>,
        config: DispatcherConfig,
    ) -> Self {
        let destinations = router.destinations().into_iter().collect();
        Self {
            pipeline: Mutex::new(build_handler_pipeline(router, &config)),
            destinations,
            broker,
            channels,
            config,
            next_call_id: AtomicU64::new(1),
        }
    }

    /// Destinations (prefix stripped) that have a handler.
    #[must_use]
    pub fn handles(&self, destination: &str) -> bool {
        self.destinations.contains(destination)
    }

    /// Invokes the handler for an application destination.
    ///
    /// The handler runs on its own task, so it completes even if the caller
    /// stops waiting. A panic inside it is reported like any other failure.
    ///
    /// # Errors
    ///
    /// Returns `NotApplicationDestination` or `NoHandler` without invoking
    /// anything, and `Aborted` if the handler task was cancelled.
    pub async fn dispatch(
        &self,
        channel: ChannelId,
        destination: &str,
        body: Bytes,
    ) -> Result<DispatchOutcome, DispatchError> {
        let Route::Application(target) = self.broker.prefixes().classify(destination) else {
            return Err(DispatchError::NotApplicationDestination {
                destination: destination.to_string(),
            });
        };
        if !self.handles(target) {
            return Err(DispatchError::NoHandler {
                destination: destination.to_string(),
            });
        }

        let request = HandlerRequest {
            call_id: self.next_call_id.fetch_add(1, Ordering::Relaxed),
            channel,
            destination: target.to_string(),
            body,
            timeout_ms: self.config.handler_timeout_ms,
        };
        let pipeline = self.pipeline.lock().clone();
        let broker = Arc::clone(&self.broker);
        let channels = Arc::clone(&self.channels);
        let origin = destination.to_string();

        let task = tokio::spawn(async move {
            let result = AssertUnwindSafe(pipeline.oneshot(request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(HandlerError::Panicked {
                        destination: origin.clone(),
                    })
                });
            complete(&broker, &channels, channel, &origin, result)
        });

        task.await.map_err(|e| {
            warn!(%channel, destination, error = %e, "handler task did not complete");
            DispatchError::Aborted
        })
    }
}

/// Publishes the reply or reports the failure to the origin channel.
fn complete(
    broker: &Broker,
    channels: &ChannelManager,
    channel: ChannelId,
    destination: &str,
    result: Result<HandlerResponse, HandlerError>,
) -> DispatchOutcome {
    match result {
        Ok(Some(reply)) => {
            if channels.state(channel) == ChannelState::Closed {
                debug!(%channel, destination, "origin closed, reply discarded");
                return DispatchOutcome::Discarded;
            }
            match broker.publish(&reply.destination, reply.body) {
                Ok(report) => DispatchOutcome::Published(report),
                Err(e) => {
                    warn!(%channel, destination, reply_to = %reply.destination, error = %e, "reply publish failed");
                    report_failure(channels, channel, destination, &e.to_string());
                    DispatchOutcome::Failed
                }
            }
        }
        Ok(None) => DispatchOutcome::NoReply,
        Err(e) => {
            warn!(%channel, destination, error = %e, "handler failed");
            report_failure(channels, channel, destination, &e.to_string());
            DispatchOutcome::Failed
        }
    }
}

fn report_failure(channels: &ChannelManager, channel: ChannelId, destination: &str, reason: &str) {
    let frame = Frame::error(reason, format!("destination: {destination}"));
    if let Err(e) = channels.send(channel, frame) {
        debug!(%channel, error = %e, "could not deliver handler error");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use relay_core::{Command, DestinationPrefixes};
    use tokio::sync::mpsc;

    use super::*;
    use crate::broker::{AllowAll, SubscriptionRegistry};
    use crate::network::{ConnectionConfig, Outbound};
    use crate::service::handler::Reply;

    struct Fixture {
        channels: Arc<ChannelManager>,
        broker: Arc<Broker>,
    }

    fn fixture() -> Fixture {
        let channels = Arc::new(ChannelManager::new(
            Arc::new(SubscriptionRegistry::new()),
            ConnectionConfig::default(),
        ));
        let broker = Arc::new(Broker::new(
            DestinationPrefixes::default(),
            Arc::clone(&channels),
            Arc::new(AllowAll),
        ));
        broker.start();
        Fixture { channels, broker }
    }

    fn dispatcher(f: &Fixture, router: HandlerRouter, config: DispatcherConfig) -> Dispatcher {
        Dispatcher::new(router, Arc::clone(&f.broker), Arc::clone(&f.channels), config)
    }

    fn open_channel(channels: &ChannelManager) -> (ChannelId, mpsc::Receiver<Outbound>) {
        let (handle, rx) = channels.register();
        channels.open(handle.id);
        (handle.id, rx)
    }

    fn next_frame(rx: &mut mpsc::Receiver<Outbound>) -> Frame {
        match rx.try_recv() {
            Ok(Outbound::Frame(frame)) => frame,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    fn greeting_router() -> HandlerRouter {
        let mut router = HandlerRouter::new();
        router.register_fn("hello", |req: HandlerRequest| async move {
            Ok(Some(Reply::new("/topic/greetings", req.body)))
        });
        router
    }

    #[tokio::test]
    async fn reply_is_published_to_subscribers() {
        let f = fixture();
        let d = dispatcher(&f, greeting_router(), DispatcherConfig::default());
        let (sender, mut sender_rx) = open_channel(&f.channels);
        let (listener, mut listener_rx) = open_channel(&f.channels);
        let (other, mut other_rx) = open_channel(&f.channels);
        f.broker.on_subscribe(listener, "s1", "/topic/greetings").await.unwrap();
        f.broker.on_subscribe(other, "s2", "/topic/greetings").await.unwrap();

        let outcome = d
            .dispatch(sender, "/app/hello", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Published(PublishReport { delivered: 2, failed: 0 })
        );

        for (rx, subscription) in [(&mut listener_rx, "s1"), (&mut other_rx, "s2")] {
            let message = next_frame(rx);
            assert_eq!(message.command(), Command::Message);
            assert_eq!(message.destination(), Some("/topic/greetings"));
            assert_eq!(message.subscription(), Some(subscription));
            assert_eq!(message.body().as_ref(), b"hi");
        }
        assert!(sender_rx.try_recv().is_err(), "sender is not subscribed");
    }

    #[tokio::test]
    async fn unknown_destination_is_no_handler() {
        let f = fixture();
        let d = dispatcher(&f, greeting_router(), DispatcherConfig::default());
        let (c, _rx) = open_channel(&f.channels);

        let err = d.dispatch(c, "/app/missing", Bytes::new()).await.unwrap_err();
        assert_eq!(
            err,
            DispatchError::NoHandler {
                destination: "/app/missing".to_string()
            }
        );
    }

    #[tokio::test]
    async fn broker_destination_is_not_dispatched() {
        let f = fixture();
        let d = dispatcher(&f, greeting_router(), DispatcherConfig::default());
        let (c, _rx) = open_channel(&f.channels);

        let err = d.dispatch(c, "/topic/hello", Bytes::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NotApplicationDestination { .. }));
    }

    #[tokio::test]
    async fn handler_without_reply() {
        let f = fixture();
        let mut router = HandlerRouter::new();
        router.register_fn("log", |_req: HandlerRequest| async { Ok(None) });
        let d = dispatcher(&f, router, DispatcherConfig::default());
        let (c, _rx) = open_channel(&f.channels);

        let outcome = d.dispatch(c, "/app/log", Bytes::new()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::NoReply);
    }

    #[tokio::test]
    async fn handler_failure_sends_error_to_origin_only() {
        let f = fixture();
        let mut router = HandlerRouter::new();
        router.register_fn("fail", |_req: HandlerRequest| async {
            Err(HandlerError::Failed(anyhow::anyhow!("bad input")))
        });
        let d = dispatcher(&f, router, DispatcherConfig::default());
        let (origin, mut origin_rx) = open_channel(&f.channels);
        let (other, mut other_rx) = open_channel(&f.channels);
        f.broker.on_subscribe(other, "s", "/topic/greetings").await.unwrap();

        let outcome = d.dispatch(origin, "/app/fail", Bytes::new()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Failed);

        let error = next_frame(&mut origin_rx);
        assert_eq!(error.command(), Command::Error);
        assert!(error.header("message").unwrap().contains("bad input"));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        let f = fixture();
        let mut router = HandlerRouter::new();
        router.register_fn("boom", |_req: HandlerRequest| async {
            if true {
                panic!("handler bug");
            }
            Ok(None)
        });
        let d = dispatcher(&f, router, DispatcherConfig::default());
        let (c, mut rx) = open_channel(&f.channels);

        let outcome = d.dispatch(c, "/app/boom", Bytes::new()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(next_frame(&mut rx).command(), Command::Error);

        // The dispatcher keeps working afterwards.
        assert_eq!(
            d.dispatch(c, "/app/boom", Bytes::new()).await.unwrap(),
            DispatchOutcome::Failed
        );
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let f = fixture();
        let mut router = HandlerRouter::new();
        router.register_fn("slow", |_req: HandlerRequest| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        });
        let config = DispatcherConfig {
            handler_timeout_ms: 20,
            ..DispatcherConfig::default()
        };
        let d = dispatcher(&f, router, config);
        let (c, mut rx) = open_channel(&f.channels);

        let outcome = d.dispatch(c, "/app/slow", Bytes::new()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Failed);
        let error = next_frame(&mut rx);
        assert!(error.header("message").unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn reply_for_closed_origin_is_discarded() {
        let f = fixture();
        let channels = Arc::clone(&f.channels);
        let mut router = HandlerRouter::new();
        router.register_fn("late", move |req: HandlerRequest| {
            let channels = Arc::clone(&channels);
            async move {
                channels.close(req.channel);
                Ok(Some(Reply::new("/topic/late", "too late")))
            }
        });
        let d = dispatcher(&f, router, DispatcherConfig::default());
        let (origin, _origin_rx) = open_channel(&f.channels);
        let (listener, mut listener_rx) = open_channel(&f.channels);
        f.broker.on_subscribe(listener, "s", "/topic/late").await.unwrap();

        let outcome = d.dispatch(origin, "/app/late", Bytes::new()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Discarded);
        assert!(listener_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_reply_destination_is_reported() {
        let f = fixture();
        let mut router = HandlerRouter::new();
        router.register_fn("misrouted", |_req: HandlerRequest| async {
            Ok(Some(Reply::new("/app/loop", "x")))
        });
        let d = dispatcher(&f, router, DispatcherConfig::default());
        let (c, mut rx) = open_channel(&f.channels);

        let outcome = d.dispatch(c, "/app/misrouted", Bytes::new()).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Failed);
        assert_eq!(next_frame(&mut rx).command(), Command::Error);
    }
}
