//! `relay-server` binary: parses configuration, wires the broker, and serves
//! until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use relay_core::DestinationPrefixes;
use relay_server::service::{HandlerRequest, Reply};
use relay_server::{
    Broker, ChannelManager, Dispatcher, HandlerRouter, LogFormat, NetworkModule, RelayArgs,
    SubscriptionRegistry,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayArgs::parse()
        .into_config()
        .context("invalid destination prefixes")?;
    init_tracing(config.log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting relay");

    let registry = Arc::new(SubscriptionRegistry::new());
    let channels = Arc::new(ChannelManager::new(
        registry,
        config.network.connection.clone(),
    ));
    let broker = Arc::new(Broker::new(
        config.prefixes.clone(),
        Arc::clone(&channels),
        config.authorizer(),
    ));
    broker.start();

    let router = handlers(&config.prefixes);
    tracing::info!(handlers = ?router.destinations(), "handlers registered");
    let dispatcher = Arc::new(Dispatcher::new(
        router,
        Arc::clone(&broker),
        Arc::clone(&channels),
        config.dispatcher.clone(),
    ));

    let mut network = NetworkModule::new(
        config.network.clone(),
        channels,
        Arc::clone(&broker),
        dispatcher,
    );
    let port = network.start().await?;
    tracing::info!(
        port,
        endpoint = %config.network.endpoint_path,
        "accepting STOMP connections"
    );

    network.serve(shutdown_signal()).await?;
    broker.stop();
    tracing::info!("relay stopped");
    Ok(())
}

/// Built-in handlers. `chat` relays each message to everyone subscribed to
/// `<broker prefix>/chat`.
fn handlers(prefixes: &DestinationPrefixes) -> HandlerRouter {
    let chat_topic = format!("{}/chat", prefixes.broker());
    let mut router = HandlerRouter::new();
    router.register_fn("chat", move |req: HandlerRequest| {
        let topic = chat_topic.clone();
        async move { Ok(Some(Reply::new(topic, req.body))) }
    });
    router
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay_server=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
