//! In-memory publish/subscribe engine.
//!
//! The broker relays bodies published to broker-prefixed destinations to every
//! channel subscribed to exactly that destination. Delivery goes through the
//! channel manager's non-blocking send: a full or closed channel is skipped
//! and counted, never retried, and never stalls delivery to the others.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use relay_core::{DestinationPrefixes, Frame};
use thiserror::Error;
use tracing::{debug, info};

use super::auth::{Denied, DestinationAuthorizer};
use super::registry::{RegistryError, SubscriptionRegistry};
use crate::network::{ChannelId, ChannelManager};

/// Errors returned by broker operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("broker is not running")]
    NotRunning,
    #[error("{destination:?} is not under the broker prefix {prefix:?}")]
    NotBrokerDestination { destination: String, prefix: String },
    #[error("channel {0} is closed")]
    ChannelClosed(ChannelId),
    #[error(transparent)]
    Forbidden(#[from] Denied),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Outcome of one publish fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscriptions the MESSAGE frame was queued for.
    pub delivered: usize,
    /// Subscriptions skipped because their channel was closed or full.
    pub failed: usize,
}

/// The broker core. Constructed explicitly and started/stopped by its owner.
pub struct Broker {
    prefixes: DestinationPrefixes,
    registry: Arc<SubscriptionRegistry>,
    channels: Arc<ChannelManager>,
    authorizer: Arc<dyn DestinationAuthorizer>,
    running: AtomicBool,
    next_message_id: AtomicU64,
}

impl Broker {
    /// Creates a stopped broker sharing the channel manager's subscription registry.
    #[must_use]
    pub fn new(
        prefixes: DestinationPrefixes,
        channels: Arc<ChannelManager>,
        authorizer: Arc<dyn DestinationAuthorizer>,
    ) -> Self {
        Self {
            prefixes,
            registry: channels.subscriptions(),
            channels,
            authorizer,
            running: AtomicBool::new(false),
            next_message_id: AtomicU64::new(1),
        }
    }

    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!(
                application_prefix = self.prefixes.application(),
                broker_prefix = self.prefixes.broker(),
                "broker started"
            );
        }
    }

    /// Stops the broker and forgets every subscription.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let dropped = self.registry.len();
            self.registry.clear();
            info!(dropped_subscriptions = dropped, "broker stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn prefixes(&self) -> &DestinationPrefixes {
        &self.prefixes
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Relays `body` to every subscriber of `destination`.
    ///
    /// The subscriber set is snapshotted on entry; subscriptions added or
    /// removed during the fan-out do not affect who receives this message.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::NotRunning` if the broker is stopped and
    /// `BrokerError::NotBrokerDestination` if `destination` is not under the
    /// broker prefix. Per-subscriber delivery failures are only counted.
    pub fn publish(&self, destination: &str, body: Bytes) -> Result<PublishReport, BrokerError> {
        self.ensure_running()?;
        self.ensure_broker_destination(destination)?;

        let subscribers = self.registry.subscribers_of(destination);
        let mut report = PublishReport::default();

        for (channel, subscription) in subscribers {
            let message_id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
            let frame = Frame::message(subscription, destination, message_id.to_string(), body.clone());
            match self.channels.send(channel, frame) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    debug!(%channel, destination, error = %e, "delivery skipped");
                }
            }
        }

        debug!(
            destination,
            delivered = report.delivered,
            failed = report.failed,
            "published"
        );
        Ok(report)
    }

    /// Relays a client SEND after consulting the authorizer.
    ///
    /// # Errors
    ///
    /// As [`publish`](Self::publish), plus `BrokerError::Forbidden` if the
    /// authorizer rejects the channel.
    pub async fn publish_from(
        &self,
        channel: ChannelId,
        destination: &str,
        body: Bytes,
    ) -> Result<PublishReport, BrokerError> {
        self.ensure_running()?;
        self.ensure_broker_destination(destination)?;
        self.authorizer.authorize_publish(channel, destination).await?;
        self.publish(destination, body)
    }

    /// Records a subscription for an open channel.
    ///
    /// # Errors
    ///
    /// Returns `NotRunning`, `NotBrokerDestination`, `ChannelClosed` (also when
    /// the channel closes while subscribing), `Forbidden`, or
    /// `Registry(DuplicateSubscription)`.
    pub async fn on_subscribe(
        &self,
        channel: ChannelId,
        subscription: &str,
        destination: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_running()?;
        self.ensure_broker_destination(destination)?;
        if !self.channels.is_open(channel) {
            return Err(BrokerError::ChannelClosed(channel));
        }
        self.authorizer.authorize_subscribe(channel, destination).await?;

        self.registry.subscribe(channel, subscription, destination)?;

        // The channel manager marks a channel Closed before purging its
        // subscriptions, so a close that raced past the check above is seen here.
        if !self.channels.is_open(channel) {
            let _ = self.registry.unsubscribe(channel, subscription);
            return Err(BrokerError::ChannelClosed(channel));
        }

        debug!(%channel, subscription, destination, "subscribed");
        Ok(())
    }

    /// Removes a subscription.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Registry(NotFound)` if it does not exist.
    pub fn on_unsubscribe(&self, channel: ChannelId, subscription: &str) -> Result<(), BrokerError> {
        let destination = self.registry.unsubscribe(channel, subscription)?;
        debug!(%channel, subscription, destination, "unsubscribed");
        Ok(())
    }

    fn ensure_running(&self) -> Result<(), BrokerError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BrokerError::NotRunning)
        }
    }

    fn ensure_broker_destination(&self, destination: &str) -> Result<(), BrokerError> {
        if self.prefixes.is_broker_destination(destination) {
            Ok(())
        } else {
            Err(BrokerError::NotBrokerDestination {
                destination: destination.to_string(),
                prefix: self.prefixes.broker().to_string(),
            })
        }
    }
}
