//! Network module with deferred startup lifecycle.
//!
//! `new()` wires shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown future resolves, then
//! drains channels.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::config::{NetworkConfig, TlsConfig};
use super::connection::ChannelManager;
use super::handlers::{
    health_handler, liveness_handler, readiness_handler, ws_upgrade_handler, AppState,
};
use super::middleware::build_http_layers;
use super::shutdown::ShutdownController;
use crate::broker::Broker;
use crate::service::Dispatcher;

/// Owns the HTTP/WebSocket server lifecycle.
///
/// 1. `new()` allocates the shutdown controller and captures shared state
/// 2. `start()` binds the listener and reports the bound port
/// 3. `serve()` runs until shutdown, then drains every channel
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    channels: Arc<ChannelManager>,
    broker: Arc<Broker>,
    dispatcher: Arc<Dispatcher>,
    shutdown: Arc<ShutdownController>,
    start_time: Instant,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        channels: Arc<ChannelManager>,
        broker: Arc<Broker>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            listener: None,
            channels,
            broker,
            dispatcher,
            shutdown: Arc::new(ShutdownController::new()),
            start_time: Instant::now(),
        }
    }

    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.shutdown)
    }

    /// Assembles the router.
    ///
    /// - `GET {endpoint_path}` STOMP WebSocket upgrade (default `/ws`)
    /// - `GET /health` detailed health JSON
    /// - `GET /health/live` liveness check
    /// - `GET /health/ready` readiness check
    pub fn build_router(&self) -> Router {
        let state = AppState {
            channels: Arc::clone(&self.channels),
            broker: Arc::clone(&self.broker),
            dispatcher: Arc::clone(&self.dispatcher),
            shutdown: Arc::clone(&self.shutdown),
            config: Arc::new(self.config.clone()),
            start_time: self.start_time,
        };

        Router::new()
            .route(&self.config.endpoint_path, get(ws_upgrade_handler))
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the listener and returns the bound port (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains.
    ///
    /// On shutdown the health state moves to `Draining`, sessions stop
    /// reading, every channel is asked to close, in-flight frames get up to
    /// `drain_timeout` to finish, and whatever channels remain are closed.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called, if TLS material cannot
    /// be loaded, or on a fatal I/O error.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let Some(listener) = self.listener.take() else {
            anyhow::bail!("start() must be called before serve()");
        };
        let router = self.build_router();

        let controller = Arc::clone(&self.shutdown);
        let channels = Arc::clone(&self.channels);
        let signal = async move {
            shutdown.await;
            info!("shutdown requested");
            controller.trigger_shutdown();
            let asked = channels.request_close_all("server shutting down");
            info!(channels = asked, "closing channels");
        };

        self.shutdown.set_ready();

        if let Some(tls) = self.config.tls.clone() {
            serve_tls(listener, router, &tls, signal).await?;
        } else {
            serve_plain(listener, router, signal).await?;
        }

        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        // No-op if the server stopped for another reason.
        self.shutdown.trigger_shutdown();

        if self.shutdown.wait_for_drain(self.config.drain_timeout).await {
            info!("in-flight frames drained");
        } else {
            warn!(
                in_flight = self.shutdown.in_flight_count(),
                "drain timeout expired with frames in flight"
            );
        }

        let remaining = self.channels.drain_all();
        if !remaining.is_empty() {
            info!(channels = remaining.len(), "closed remaining channels");
        }
    }
}

async fn serve_plain(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    info!("serving plain HTTP/WS");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Serves over TLS with `axum-server`, reusing the pre-bound listener.
async fn serve_tls(
    listener: TcpListener,
    router: Router,
    tls: &TlsConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    use axum_server::tls_rustls::RustlsConfig;

    let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load TLS certificates: {e}"))?;

    let addr = listener.local_addr()?;
    let std_listener = listener.into_std()?;
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();

    tokio::spawn(async move {
        shutdown.await;
        shutdown_handle.graceful_shutdown(None);
    });

    info!(%addr, "serving TLS");

    axum_server::from_tcp_rustls(std_listener, rustls_config)
        .handle(handle)
        .serve(router.into_make_service())
        .await?;
    Ok(())
}
