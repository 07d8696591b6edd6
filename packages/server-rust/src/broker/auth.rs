//! Per-destination authorization hook.
//!
//! The broker consults a [`DestinationAuthorizer`] before recording a client
//! subscription and before relaying a client SEND to a broker destination.
//! Messages the server publishes itself (handler replies) are not checked.

use async_trait::async_trait;
use thiserror::Error;

use crate::network::ChannelId;

/// Rejection returned by an authorizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("access to {destination:?} denied: {reason}")]
pub struct Denied {
    pub destination: String,
    pub reason: String,
}

impl Denied {
    #[must_use]
    pub fn new(destination: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            reason: reason.into(),
        }
    }
}

/// Decides whether a channel may subscribe or publish to a destination.
#[async_trait]
pub trait DestinationAuthorizer: Send + Sync {
    /// Called before a SUBSCRIBE is recorded.
    async fn authorize_subscribe(&self, channel: ChannelId, destination: &str)
        -> Result<(), Denied>;

    /// Called before a client SEND is relayed to subscribers.
    async fn authorize_publish(&self, channel: ChannelId, destination: &str)
        -> Result<(), Denied>;
}

/// Authorizer that permits everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl DestinationAuthorizer for AllowAll {
    async fn authorize_subscribe(&self, _channel: ChannelId, _destination: &str) -> Result<(), Denied> {
        Ok(())
    }

    async fn authorize_publish(&self, _channel: ChannelId, _destination: &str) -> Result<(), Denied> {
        Ok(())
    }
}

/// Authorizer that lets clients subscribe anywhere but only publish to the
/// listed destinations; everything else must go through application handlers.
#[derive(Debug, Clone, Default)]
pub struct PublishAllowList {
    destinations: Vec<String>,
}

impl PublishAllowList {
    #[must_use]
    pub fn new(destinations: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            destinations: destinations.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl DestinationAuthorizer for PublishAllowList {
    async fn authorize_subscribe(&self, _channel: ChannelId, _destination: &str) -> Result<(), Denied> {
        Ok(())
    }

    async fn authorize_publish(&self, _channel: ChannelId, destination: &str) -> Result<(), Denied> {
        if self.destinations.iter().any(|d| d == destination) {
            Ok(())
        } else {
            Err(Denied::new(destination, "clients may not publish here"))
        }
    }
}
