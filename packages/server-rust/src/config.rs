//! Command-line and environment configuration for the relay binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use relay_core::{DestinationPrefixes, PrefixError};

use crate::broker::{AllowAll, DestinationAuthorizer, PublishAllowList};
use crate::network::{ConnectionConfig, NetworkConfig, TlsConfig};
use crate::service::DispatcherConfig;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Relay: a STOMP message broker over WebSocket.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-server", version, about)]
pub struct RelayArgs {
    /// Address to bind.
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind (0 for OS-assigned).
    #[arg(long, env = "RELAY_PORT", default_value_t = 8080)]
    pub port: u16,

    /// HTTP path of the STOMP WebSocket endpoint.
    #[arg(long, env = "RELAY_ENDPOINT", default_value = "/ws")]
    pub endpoint: String,

    /// Destinations under this prefix go to application handlers.
    #[arg(long, env = "RELAY_APPLICATION_PREFIX", default_value = DestinationPrefixes::DEFAULT_APPLICATION)]
    pub application_prefix: String,

    /// Destinations under this prefix are relayed by the broker.
    #[arg(long, env = "RELAY_BROKER_PREFIX", default_value = DestinationPrefixes::DEFAULT_BROKER)]
    pub broker_prefix: String,

    /// Outbound queue capacity per channel.
    #[arg(long, env = "RELAY_OUTBOUND_CAPACITY", default_value_t = 256)]
    pub outbound_capacity: usize,

    /// Largest accepted inbound frame in bytes; bigger frames get ERROR.
    #[arg(long, env = "RELAY_MAX_FRAME_SIZE", default_value_t = 65_536)]
    pub max_frame_size: usize,

    /// Largest WebSocket message read at all; bigger ones end the connection.
    #[arg(long, env = "RELAY_MAX_MESSAGE_SIZE", default_value_t = 1_048_576)]
    pub max_message_size: usize,

    /// Broker destinations clients may SEND to directly. Empty allows all.
    #[arg(long, env = "RELAY_PUBLISH_ALLOW", value_delimiter = ',')]
    pub publish_allow: Vec<String>,

    /// Handler timeout in milliseconds.
    #[arg(long, env = "RELAY_HANDLER_TIMEOUT_MS", default_value_t = 30_000)]
    pub handler_timeout_ms: u64,

    /// Maximum concurrently running handlers.
    #[arg(long, env = "RELAY_MAX_CONCURRENT_HANDLERS", default_value_t = 1000)]
    pub max_concurrent_handlers: u32,

    /// Seconds to wait for in-flight frames on shutdown.
    #[arg(long, env = "RELAY_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Allowed CORS origins; `*` allows any.
    #[arg(long, env = "RELAY_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// PEM certificate; enables TLS together with `--tls-key`.
    #[arg(long, env = "RELAY_TLS_CERT", requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, env = "RELAY_TLS_KEY", requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Log output format.
    #[arg(long, env = "RELAY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub network: NetworkConfig,
    pub prefixes: DestinationPrefixes,
    pub dispatcher: DispatcherConfig,
    /// Broker destinations open to client SENDs; empty means unrestricted.
    pub publish_allow: Vec<String>,
    pub log_format: LogFormat,
}

impl RelayConfig {
    /// Authorizer for client operations: a publish allow-list when one is
    /// configured, otherwise [`AllowAll`].
    #[must_use]
    pub fn authorizer(&self) -> Arc<dyn DestinationAuthorizer> {
        if self.publish_allow.is_empty() {
            Arc::new(AllowAll)
        } else {
            Arc::new(PublishAllowList::new(self.publish_allow.iter().cloned()))
        }
    }
}

impl RelayArgs {
    /// Validates the arguments into a [`RelayConfig`].
    ///
    /// # Errors
    ///
    /// Returns a `PrefixError` if the destination prefixes are invalid or overlap.
    pub fn into_config(self) -> Result<RelayConfig, PrefixError> {
        let prefixes = DestinationPrefixes::new(&self.application_prefix, &self.broker_prefix)?;

        let tls = match (self.tls_cert, self.tls_key) {
            (Some(cert_path), Some(key_path)) => Some(TlsConfig { cert_path, key_path }),
            _ => None,
        };

        let network = NetworkConfig {
            host: self.host,
            port: self.port,
            endpoint_path: self.endpoint,
            tls,
            connection: ConnectionConfig {
                outbound_channel_capacity: self.outbound_capacity,
                max_frame_size: self.max_frame_size,
                max_message_size: self.max_message_size,
                ..ConnectionConfig::default()
            },
            cors_origins: self.cors_origins,
            drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            ..NetworkConfig::default()
        };

        Ok(RelayConfig {
            network,
            prefixes,
            dispatcher: DispatcherConfig {
                handler_timeout_ms: self.handler_timeout_ms,
                max_concurrent_handlers: self.max_concurrent_handlers,
            },
            publish_allow: self.publish_allow,
            log_format: self.log_format,
        })
    }
}
