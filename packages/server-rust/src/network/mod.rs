//! Networking: configuration, channel management, shutdown control, and the
//! axum server exposing the STOMP WebSocket endpoint.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use connection::*;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::*;
