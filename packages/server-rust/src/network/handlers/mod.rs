//! HTTP and WebSocket handlers.
//!
//! Defines `AppState`, the state shared with every axum handler, and
//! re-exports the handler functions used to build the router.

pub mod health;
pub mod websocket;

pub use health::{health_handler, liveness_handler, readiness_handler};
pub use websocket::ws_upgrade_handler;

use std::sync::Arc;
use std::time::Instant;

use super::{ChannelManager, NetworkConfig, ShutdownController};
use crate::broker::Broker;
use crate::service::Dispatcher;

/// Shared application state passed to handlers via `State` extraction.
///
/// Every field is an `Arc` or `Copy`, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub channels: Arc<ChannelManager>,
    pub broker: Arc<Broker>,
    pub dispatcher: Arc<Dispatcher>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Process start, for uptime reporting.
    pub start_time: Instant,
}

#[cfg(test)]
pub(crate) mod test_support {
    use relay_core::DestinationPrefixes;

    use super::*;
    use crate::broker::{AllowAll, SubscriptionRegistry};
    use crate::service::{DispatcherConfig, HandlerRouter};

    /// State wired to an empty handler router and a running broker.
    pub(crate) fn app_state() -> AppState {
        let config = NetworkConfig::default();
        let channels = Arc::new(ChannelManager::new(
            Arc::new(SubscriptionRegistry::new()),
            config.connection.clone(),
        ));
        let broker = Arc::new(Broker::new(
            DestinationPrefixes::default(),
            Arc::clone(&channels),
            Arc::new(AllowAll),
        ));
        broker.start();
        let dispatcher = Arc::new(Dispatcher::new(
            HandlerRouter::new(),
            Arc::clone(&broker),
            Arc::clone(&channels),
            DispatcherConfig::default(),
        ));
        AppState {
            channels,
            broker,
            dispatcher,
            shutdown: Arc::new(ShutdownController::new()),
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }
}
