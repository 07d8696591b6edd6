//! Relay server: an in-memory STOMP broker served over axum WebSockets.
//!
//! Client SENDs to the application prefix run registered handlers whose
//! replies are published to broker destinations; SENDs to the broker prefix
//! are relayed directly to every subscriber of that exact destination.

pub mod broker;
pub mod config;
pub mod network;
pub mod service;
pub mod session;

pub use broker::{Broker, BrokerError, DestinationAuthorizer, SubscriptionRegistry};
pub use config::{LogFormat, RelayArgs, RelayConfig};
pub use network::{ChannelManager, NetworkModule};
pub use service::{Dispatcher, HandlerRouter, Reply};
pub use session::Session;
