//! Network configuration types for the relay server.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Path at which clients open their STOMP WebSocket.
    pub endpoint_path: String,
    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,
    /// Per-channel settings.
    pub connection: ConnectionConfig,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for an HTTP request to complete.
    pub request_timeout: Duration,
    /// How long shutdown waits for open channels to drain.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            endpoint_path: "/ws".to_string(),
            tls: None,
            connection: ConnectionConfig::default(),
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// TLS certificate configuration.
///
/// No `Default` impl because certificate paths have no sensible defaults.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    /// Path to the TLS certificate file.
    pub cert_path: PathBuf,
    /// Path to the TLS private key file.
    pub key_path: PathBuf,
}

/// Per-channel configuration controlling backpressure and socket limits.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Capacity of each channel's outbound frame queue. When full, new frames
    /// for that channel are rejected.
    pub outbound_channel_capacity: usize,
    /// How long a closing channel may take to flush its queued frames.
    pub flush_timeout: Duration,
    /// Largest accepted STOMP frame in bytes. Larger frames are answered
    /// with ERROR and the channel stays open.
    pub max_frame_size: usize,
    /// Largest WebSocket message the transport reads at all. Anything bigger
    /// ends the connection.
    pub max_message_size: usize,
    /// WebSocket write buffer size in bytes.
    pub ws_write_buffer_size: usize,
    /// Maximum WebSocket write buffer size in bytes.
    pub ws_max_write_buffer_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            outbound_channel_capacity: 256,
            flush_timeout: Duration::from_secs(5),
            max_frame_size: 65_536,             // 64 KB
            max_message_size: 1_048_576,        // 1 MB
            ws_write_buffer_size: 131_072,     // 128 KB
            ws_max_write_buffer_size: 524_288, // 512 KB
        }
    }
}

impl ConnectionConfig {
    /// Transport read limit; never below `max_frame_size`.
    #[must_use]
    pub fn transport_message_limit(&self) -> usize {
        self.max_message_size.max(self.max_frame_size)
    }
}
