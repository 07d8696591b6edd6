//! Subscription bookkeeping.
//!
//! A single `RwLock` guards two indexes: per-channel (for `unsubscribe` and
//! `remove_channel`) and per-destination (for publish fan-out). Both are
//! updated under the same write guard, so they never disagree.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::network::ChannelId;

/// Errors from registry misuse. Neither is fatal to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("subscription {id:?} already exists on channel {channel}")]
    DuplicateSubscription { channel: ChannelId, id: String },
    #[error("no subscription {id:?} on channel {channel}")]
    NotFound { channel: ChannelId, id: String },
}

/// One channel's interest in one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub channel: ChannelId,
    pub id: String,
    pub destination: String,
}

#[derive(Debug, Default)]
struct Inner {
    /// channel -> (subscription id -> destination)
    by_channel: HashMap<ChannelId, HashMap<String, String>>,
    /// destination -> subscribers in subscription order
    by_destination: HashMap<String, Vec<(ChannelId, String)>>,
}

/// Thread-safe registry of live subscriptions, keyed by `(channel, id)`.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a subscription.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateSubscription` if the channel already
    /// has a subscription with this id.
    pub fn subscribe(
        &self,
        channel: ChannelId,
        id: &str,
        destination: &str,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();

        let subs = inner.by_channel.entry(channel).or_default();
        if subs.contains_key(id) {
            return Err(RegistryError::DuplicateSubscription {
                channel,
                id: id.to_string(),
            });
        }
        subs.insert(id.to_string(), destination.to_string());

        inner
            .by_destination
            .entry(destination.to_string())
            .or_default()
            .push((channel, id.to_string()));
        Ok(())
    }

    /// Removes a subscription, returning the destination it was bound to.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if the channel has no subscription
    /// with this id.
    pub fn unsubscribe(&self, channel: ChannelId, id: &str) -> Result<String, RegistryError> {
        let mut inner = self.inner.write();

        let destination = inner
            .by_channel
            .get_mut(&channel)
            .and_then(|subs| subs.remove(id))
            .ok_or_else(|| RegistryError::NotFound {
                channel,
                id: id.to_string(),
            })?;

        if inner
            .by_channel
            .get(&channel)
            .is_some_and(HashMap::is_empty)
        {
            inner.by_channel.remove(&channel);
        }
        inner.detach(&destination, channel, Some(id));
        Ok(destination)
    }

    /// Removes every subscription held by `channel`. Idempotent.
    ///
    /// Returns the removed subscriptions, sorted by id.
    pub fn remove_channel(&self, channel: ChannelId) -> Vec<Subscription> {
        let mut inner = self.inner.write();

        let Some(subs) = inner.by_channel.remove(&channel) else {
            return Vec::new();
        };
        for destination in subs.values() {
            inner.detach(destination, channel, None);
        }
        drop(inner);

        let mut removed: Vec<Subscription> = subs
            .into_iter()
            .map(|(id, destination)| Subscription {
                channel,
                id,
                destination,
            })
            .collect();
        removed.sort_by(|a, b| a.id.cmp(&b.id));
        removed
    }

    /// Snapshot of `(channel, subscription id)` pairs subscribed to exactly
    /// `destination`, in subscription order.
    #[must_use]
    pub fn subscribers_of(&self, destination: &str) -> Vec<(ChannelId, String)> {
        self.inner
            .read()
            .by_destination
            .get(destination)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().by_channel.values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every subscription.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.by_channel.clear();
        inner.by_destination.clear();
    }
}

impl Inner {
    /// Removes `channel`'s entries (all of them, or only `id`) from a destination list.
    fn detach(&mut self, destination: &str, channel: ChannelId, id: Option<&str>) {
        if let Some(list) = self.by_destination.get_mut(destination) {
            list.retain(|(c, sub)| !(*c == channel && id.map_or(true, |id| sub.as_str() == id)));
            if list.is_empty() {
                self.by_destination.remove(destination);
            }
        }
    }
}
