use thiserror::Error;

use crate::frame::Command;

/// Errors from decoding or validating a frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The bytes are not a frame, or a required header is absent.
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },
}

impl FrameError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedFrame {
            reason: reason.into(),
        }
    }

    pub(crate) fn missing_header(command: Command, name: &str) -> Self {
        Self::malformed(format!("{command} frame requires a '{name}' header"))
    }
}

/// Errors from building a [`DestinationPrefixes`](crate::DestinationPrefixes).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrefixError {
    #[error("destination prefix must start with '/': {prefix:?}")]
    NotAbsolute { prefix: String },
    #[error("destination prefix must name at least one segment: {prefix:?}")]
    Empty { prefix: String },
    #[error("destination prefixes overlap: {application:?} and {broker:?}")]
    Overlapping { application: String, broker: String },
}

/// A destination that matches neither configured prefix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("destination {destination:?} matches no configured prefix")]
    Unroutable { destination: String },
}
