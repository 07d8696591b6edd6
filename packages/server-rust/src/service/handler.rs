//! Request, reply, and error types for application handlers.

use bytes::Bytes;
use thiserror::Error;

use crate::network::ChannelId;

/// A client SEND routed to an application handler.
#[derive(Debug, Clone)]
pub struct HandlerRequest {
    /// Monotonic id for correlating log lines of one invocation.
    pub call_id: u64,
    /// Channel the SEND arrived on.
    pub channel: ChannelId,
    /// Destination with the application prefix stripped (`"hello"` for `/app/hello`).
    pub destination: String,
    /// Frame body as received.
    pub body: Bytes,
    /// Deadline enforced by the timeout layer.
    pub timeout_ms: u64,
}

/// A value produced by a handler, published to a broker destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub destination: String,
    pub body: Bytes,
}

impl Reply {
    #[must_use]
    pub fn new(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            destination: destination.into(),
            body: body.into(),
        }
    }
}

/// Why a handler invocation produced no usable result.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("no handler registered for {destination:?}")]
    NoHandler { destination: String },

    #[error("handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("too many handlers running")]
    Overloaded,

    #[error("handler for {destination:?} panicked")]
    Panicked { destination: String },

    #[error("handler failed: {0}")]
    Failed(#[from] anyhow::Error),
}

/// Response type of every handler service.
pub type HandlerResponse = Option<Reply>;
