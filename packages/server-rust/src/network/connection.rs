//! Channel management for the relay server.
//!
//! Each client channel gets a bounded outbound queue drained by its WebSocket
//! writer, a lifecycle state, and a little session metadata. Live channels
//! are tracked in a `DashMap`; closing a channel purges its subscriptions.
//!
//! Lifecycle: `Connecting -> Open -> Closing -> Closed`. Frames are only
//! accepted while `Open`. A `Closing` channel still flushes what is already
//! queued; `close()` marks it `Closed` and removes it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use relay_core::Frame;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use super::config::ConnectionConfig;
use crate::broker::SubscriptionRegistry;

/// Unique identifier for a channel, assigned by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Registered, transport handshake not yet complete.
    Connecting,
    /// Accepting frames in both directions.
    Open,
    /// No new outbound frames; queued frames are being flushed.
    Closing,
    /// Gone from the live set, subscriptions purged.
    Closed,
}

impl ChannelState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// Item queued for a channel's writer.
#[derive(Debug)]
pub enum Outbound {
    /// A frame to encode and send.
    Frame(Frame),
    /// Close the transport with an optional reason. Always the last item.
    Close(Option<String>),
}

/// Error returned when a frame cannot be queued for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The channel is not open (closing, closed, or unknown).
    #[error("channel is closed")]
    ChannelClosed,
    /// The outbound queue is full; the frame was rejected.
    #[error("outbound queue is full")]
    Full,
}

/// Session metadata recorded by the STOMP session layer.
#[derive(Debug, Clone, Default)]
pub struct ChannelMetadata {
    /// Session id issued in CONNECTED, once the client has sent CONNECT.
    pub session: Option<String>,
    /// Negotiated protocol version.
    pub version: Option<String>,
}

/// Handle to a single channel.
#[derive(Debug)]
pub struct ChannelHandle {
    /// Unique channel identifier assigned by the manager.
    pub id: ChannelId,
    tx: mpsc::Sender<Outbound>,
    state: Mutex<ChannelState>,
    /// Mutable session metadata.
    pub metadata: RwLock<ChannelMetadata>,
    /// When this channel was registered.
    pub connected_at: Instant,
}

impl ChannelHandle {
    #[must_use]
    pub fn state(&self) -> ChannelState {
        *self.state.lock()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Queues a frame without blocking.
    ///
    /// A dead writer is a send error: the channel moves `Open -> Closing`.
    ///
    /// # Errors
    ///
    /// Returns `SendError::ChannelClosed` unless the channel is `Open` and its
    /// writer is alive, and `SendError::Full` if the queue is at capacity.
    pub fn try_send(&self, frame: Frame) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::ChannelClosed);
        }
        self.tx.try_send(Outbound::Frame(frame)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => {
                if self.transition(&[ChannelState::Open], ChannelState::Closing) {
                    debug!(channel = %self.id, "writer gone, channel closing");
                }
                SendError::ChannelClosed
            }
        })
    }

    /// `true` once the writer has dropped its end of the outbound queue.
    #[must_use]
    pub fn writer_gone(&self) -> bool {
        self.tx.is_closed()
    }

    /// Moves the channel to `state` if its current state is one of `from`.
    fn transition(&self, from: &[ChannelState], to: ChannelState) -> bool {
        let mut state = self.state.lock();
        if from.contains(&state) {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Enters `Closing` and queues the final `Close` item for the writer.
    ///
    /// Returns `false` if the writer is gone or its queue is full; the caller
    /// then stops waiting for a flush.
    pub fn request_close(&self, reason: Option<String>) -> bool {
        self.transition(
            &[ChannelState::Connecting, ChannelState::Open],
            ChannelState::Closing,
        );
        self.tx.try_send(Outbound::Close(reason)).is_ok()
    }
}

/// Owns the set of live channels and their lifecycle.
#[derive(Debug)]
pub struct ChannelManager {
    channels: DashMap<ChannelId, Arc<ChannelHandle>>,
    next_id: AtomicU64,
    subscriptions: Arc<SubscriptionRegistry>,
    config: ConnectionConfig,
}

impl ChannelManager {
    /// Creates an empty manager. Channel IDs start at 1.
    #[must_use]
    pub fn new(subscriptions: Arc<SubscriptionRegistry>, config: ConnectionConfig) -> Self {
        Self {
            channels: DashMap::new(),
            next_id: AtomicU64::new(1),
            subscriptions,
            config,
        }
    }

    /// The subscription registry purged on channel close.
    #[must_use]
    pub fn subscriptions(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.subscriptions)
    }

    /// Registers a new channel in `Connecting`, returning its handle and the
    /// receiver its writer drains.
    pub fn register(&self) -> (Arc<ChannelHandle>, mpsc::Receiver<Outbound>) {
        let id = ChannelId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.config.outbound_channel_capacity);

        let handle = Arc::new(ChannelHandle {
            id,
            tx,
            state: Mutex::new(ChannelState::Connecting),
            metadata: RwLock::new(ChannelMetadata::default()),
            connected_at: Instant::now(),
        });

        self.channels.insert(id, Arc::clone(&handle));
        debug!(channel = %id, "channel registered");
        (handle, rx)
    }

    /// `Connecting -> Open`, once the transport handshake has completed.
    pub fn open(&self, id: ChannelId) -> bool {
        self.get(id)
            .is_some_and(|h| h.transition(&[ChannelState::Connecting], ChannelState::Open))
    }

    /// `Connecting | Open -> Closing`. New frames are refused from here on.
    pub fn begin_close(&self, id: ChannelId) -> bool {
        self.get(id).is_some_and(|h| {
            h.transition(
                &[ChannelState::Connecting, ChannelState::Open],
                ChannelState::Closing,
            )
        })
    }

    /// Marks the channel `Closed`, drops it from the live set, and removes its
    /// subscriptions. Idempotent.
    ///
    /// Returns the handle if the channel was still live.
    pub fn close(&self, id: ChannelId) -> Option<Arc<ChannelHandle>> {
        let (_, handle) = self.channels.remove(&id)?;
        // State first: a concurrent subscribe re-checks it after inserting.
        *handle.state.lock() = ChannelState::Closed;
        let removed = self.subscriptions.remove_channel(id);
        for sub in &removed {
            debug!(channel = %id, subscription = %sub.id, destination = %sub.destination, "subscription dropped");
        }
        debug!(
            channel = %id,
            removed_subscriptions = removed.len(),
            lifetime_ms = u64::try_from(handle.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "channel closed"
        );
        Some(handle)
    }

    /// Looks up a live channel.
    pub fn get(&self, id: ChannelId) -> Option<Arc<ChannelHandle>> {
        self.channels.get(&id).map(|r| Arc::clone(r.value()))
    }

    /// Current state; unknown channels are `Closed`.
    #[must_use]
    pub fn state(&self, id: ChannelId) -> ChannelState {
        self.get(id).map_or(ChannelState::Closed, |h| h.state())
    }

    #[must_use]
    pub fn is_open(&self, id: ChannelId) -> bool {
        self.state(id) == ChannelState::Open
    }

    /// Queues a frame for a channel without blocking.
    ///
    /// A channel whose writer is gone has nothing left to flush, so it is
    /// closed here and its subscriptions are removed.
    ///
    /// # Errors
    ///
    /// Returns `SendError::ChannelClosed` if the channel is unknown or not
    /// `Open`, and `SendError::Full` if its queue is at capacity.
    pub fn send(&self, id: ChannelId, frame: Frame) -> Result<(), SendError> {
        let handle = self.get(id).ok_or(SendError::ChannelClosed)?;
        let result = handle.try_send(frame);
        if result.is_err() && handle.writer_gone() {
            self.close(id);
        }
        result
    }

    /// Number of live channels.
    #[must_use]
    pub fn count(&self) -> usize {
        self.channels.len()
    }

    /// Counts live channels in the given state.
    #[must_use]
    pub fn count_in_state(&self, state: ChannelState) -> usize {
        self.channels
            .iter()
            .filter(|entry| entry.value().state() == state)
            .count()
    }

    /// Returns all live channels as a collected `Vec`.
    #[must_use]
    pub fn channels(&self) -> Vec<Arc<ChannelHandle>> {
        self.channels
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Asks every live channel to close. Returns how many were asked.
    pub fn request_close_all(&self, reason: &str) -> usize {
        let handles = self.channels();
        for handle in &handles {
            handle.request_close(Some(reason.to_string()));
        }
        handles.len()
    }

    /// Closes and returns every remaining channel. Used at the end of shutdown.
    pub fn drain_all(&self) -> Vec<Arc<ChannelHandle>> {
        let ids: Vec<ChannelId> = self.channels.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.close(id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_capacity(capacity: usize) -> ChannelManager {
        ChannelManager::new(
            Arc::new(SubscriptionRegistry::new()),
            ConnectionConfig {
                outbound_channel_capacity: capacity,
                ..ConnectionConfig::default()
            },
        )
    }

    fn manager() -> ChannelManager {
        manager_with_capacity(256)
    }

    fn frame() -> Frame {
        Frame::receipt("r-1")
    }

    #[test]
    fn ids_start_at_one_and_increase() {
        let channels = manager();
        let (h1, _rx1) = channels.register();
        let (h2, _rx2) = channels.register();
        assert_eq!(h1.id, ChannelId(1));
        assert_eq!(h2.id, ChannelId(2));
        assert_eq!(channels.count(), 2);
    }

    #[test]
    fn lifecycle_transitions() {
        let channels = manager();
        let (handle, _rx) = channels.register();
        let id = handle.id;

        assert_eq!(channels.state(id), ChannelState::Connecting);
        assert!(channels.open(id));
        assert_eq!(channels.state(id), ChannelState::Open);
        assert!(!channels.open(id), "open is only valid from Connecting");

        assert!(channels.begin_close(id));
        assert_eq!(channels.state(id), ChannelState::Closing);
        assert!(!channels.begin_close(id));

        assert!(channels.close(id).is_some());
        assert_eq!(channels.state(id), ChannelState::Closed);
        assert_eq!(handle.state(), ChannelState::Closed);
        assert!(channels.close(id).is_none(), "close is idempotent");
        assert_eq!(channels.count(), 0);
    }

    #[test]
    fn send_requires_open_channel() {
        let channels = manager();
        let (handle, mut rx) = channels.register();
        let id = handle.id;

        assert_eq!(channels.send(id, frame()), Err(SendError::ChannelClosed));

        channels.open(id);
        assert_eq!(channels.send(id, frame()), Ok(()));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));

        channels.begin_close(id);
        assert_eq!(channels.send(id, frame()), Err(SendError::ChannelClosed));
    }

    #[test]
    fn send_to_unknown_channel_is_closed() {
        let channels = manager();
        assert_eq!(
            channels.send(ChannelId(42), frame()),
            Err(SendError::ChannelClosed)
        );
    }

    #[test]
    fn send_to_full_queue_is_rejected() {
        let channels = manager_with_capacity(2);
        let (handle, _rx) = channels.register();
        channels.open(handle.id);

        assert!(channels.send(handle.id, frame()).is_ok());
        assert!(channels.send(handle.id, frame()).is_ok());
        assert_eq!(channels.send(handle.id, frame()), Err(SendError::Full));
    }

    #[test]
    fn send_after_writer_dropped_is_closed() {
        let channels = manager();
        let (handle, rx) = channels.register();
        channels.open(handle.id);
        drop(rx);

        assert_eq!(handle.try_send(frame()), Err(SendError::ChannelClosed));
        assert_eq!(handle.state(), ChannelState::Closing);
        assert!(handle.writer_gone());
    }

    #[test]
    fn send_to_dead_writer_closes_channel_and_purges_subscriptions() {
        let channels = manager();
        let registry = channels.subscriptions();
        let (handle, rx) = channels.register();
        channels.open(handle.id);
        registry.subscribe(handle.id, "s", "/topic/x").unwrap();
        drop(rx);

        assert_eq!(channels.send(handle.id, frame()), Err(SendError::ChannelClosed));
        assert_eq!(handle.state(), ChannelState::Closed);
        assert_eq!(channels.state(handle.id), ChannelState::Closed);
        assert_eq!(channels.count(), 0);
        assert!(registry.is_empty());

        // Later sends see an unknown channel.
        assert_eq!(channels.send(handle.id, frame()), Err(SendError::ChannelClosed));
    }

    #[test]
    fn full_queue_does_not_close_channel() {
        let channels = manager_with_capacity(1);
        let (handle, _rx) = channels.register();
        channels.open(handle.id);

        channels.send(handle.id, frame()).unwrap();
        assert_eq!(channels.send(handle.id, frame()), Err(SendError::Full));
        assert_eq!(handle.state(), ChannelState::Open);
    }

    #[test]
    fn close_purges_subscriptions() {
        let channels = manager();
        let (handle, _rx) = channels.register();
        let registry = channels.subscriptions();
        registry.subscribe(handle.id, "a", "/topic/x").unwrap();
        registry.subscribe(handle.id, "b", "/topic/y").unwrap();

        channels.close(handle.id);
        assert!(registry.is_empty());
    }

    #[test]
    fn request_close_queues_close_after_pending_frames() {
        let channels = manager();
        let (handle, mut rx) = channels.register();
        channels.open(handle.id);
        channels.send(handle.id, frame()).unwrap();

        assert!(handle.request_close(Some("bye".to_string())));
        assert_eq!(handle.state(), ChannelState::Closing);

        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close(Some(reason))) if reason == "bye"));
    }

    #[test]
    fn count_in_state() {
        let channels = manager();
        let (h1, _rx1) = channels.register();
        let (_h2, _rx2) = channels.register();
        channels.open(h1.id);

        assert_eq!(channels.count_in_state(ChannelState::Open), 1);
        assert_eq!(channels.count_in_state(ChannelState::Connecting), 1);
    }

    #[test]
    fn request_close_all_and_drain_all() {
        let channels = manager();
        let (h1, mut rx1) = channels.register();
        let (_h2, _rx2) = channels.register();
        channels.open(h1.id);

        assert_eq!(channels.request_close_all("shutting down"), 2);
        assert!(matches!(rx1.try_recv(), Ok(Outbound::Close(_))));
        assert_eq!(channels.count_in_state(ChannelState::Closing), 2);

        let drained = channels.drain_all();
        assert_eq!(drained.len(), 2);
        assert_eq!(channels.count(), 0);
        assert!(drained.iter().all(|h| h.state() == ChannelState::Closed));
    }
}
