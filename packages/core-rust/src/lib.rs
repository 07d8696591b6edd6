//! Relay core: STOMP frame model, text codec, and destination classification.

pub mod codec;
pub mod destination;
pub mod error;
pub mod frame;

pub use destination::{classify, DestinationPrefixes, Route};
pub use error::{FrameError, PrefixError, RouteError};
pub use frame::{header, Command, Frame};
