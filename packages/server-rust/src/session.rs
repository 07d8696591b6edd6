//! Per-channel STOMP session: interprets inbound frames in arrival order.
//!
//! The session owns the protocol state of one channel (whether CONNECT has
//! been seen) and turns each client frame into broker or dispatcher calls.
//! Failures are answered with an ERROR frame on the same channel; the
//! channel stays open.

use std::sync::Arc;

use relay_core::{header, Command, Frame, FrameError, Route, RouteError};
use thiserror::Error;
use tracing::{debug, info};

use crate::broker::{Broker, BrokerError};
use crate::network::{ChannelHandle, ChannelId};
use crate::service::{DispatchError, DispatchOutcome, Dispatcher};

/// Protocol versions accepted in CONNECT, most preferred first.
pub const SUPPORTED_VERSIONS: [&str; 3] = ["1.2", "1.1", "1.0"];

/// Value of the `server` header in CONNECTED.
pub const SERVER_NAME: &str = concat!("relay/", env!("CARGO_PKG_VERSION"));

/// What the connection loop should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The client sent DISCONNECT; close after flushing.
    Disconnect,
}

/// A client frame that could not be honoured.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not connected: CONNECT must be the first frame")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("no supported protocol version in {offered:?}")]
    UnsupportedVersion { offered: String },

    #[error("{0} frames are only sent by the server")]
    ServerCommand(Command),

    #[error("missing '{name}' header")]
    MissingHeader { name: &'static str },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

enum Handled {
    Done(Flow),
    /// A failure was already reported to the client by the dispatcher.
    Reported,
}

/// STOMP session state for one channel.
pub struct Session {
    channel: Arc<ChannelHandle>,
    broker: Arc<Broker>,
    dispatcher: Arc<Dispatcher>,
    connected: bool,
}

impl Session {
    #[must_use]
    pub fn new(channel: Arc<ChannelHandle>, broker: Arc<Broker>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            channel,
            broker,
            dispatcher,
            connected: false,
        }
    }

    #[must_use]
    pub fn id(&self) -> ChannelId {
        self.channel.id
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Processes one client frame.
    ///
    /// A `receipt` header is answered with RECEIPT after success, or echoed
    /// as `receipt-id` on the ERROR frame after failure.
    pub async fn handle(&mut self, frame: Frame) -> Flow {
        let receipt = frame.header(header::RECEIPT).map(str::to_owned);
        let command = frame.command();

        match self.process(frame).await {
            Ok(Handled::Done(flow)) => {
                if let Some(id) = receipt {
                    self.reply(Frame::receipt(id));
                }
                flow
            }
            Ok(Handled::Reported) => Flow::Continue,
            Err(e) => {
                debug!(channel = %self.id(), %command, error = %e, "frame rejected");
                let mut error = Frame::error(e.to_string(), format!("command: {command}"));
                if let Some(id) = receipt {
                    error = error.with_header(header::RECEIPT_ID, id);
                }
                self.reply(error);
                Flow::Continue
            }
        }
    }

    /// Answers bytes that did not decode as a frame.
    pub fn reject_malformed(&self, error: &FrameError) {
        debug!(channel = %self.id(), %error, "malformed frame");
        self.reply(Frame::error("malformed frame", error.to_string()));
    }

    /// Answers a frame larger than the configured limit without parsing it.
    pub fn reject_oversized(&self, size: usize, limit: usize) {
        debug!(channel = %self.id(), size, limit, "frame too large");
        self.reply(Frame::error(
            "frame too large",
            format!("{size} bytes exceeds the {limit} byte limit"),
        ));
    }

    async fn process(&mut self, frame: Frame) -> Result<Handled, SessionError> {
        let command = frame.command();
        if command.is_server_command() {
            return Err(SessionError::ServerCommand(command));
        }
        if !self.connected && !matches!(command, Command::Connect | Command::Disconnect) {
            return Err(SessionError::NotConnected);
        }

        match command {
            Command::Connect => self.connect(&frame).map(|()| Handled::Done(Flow::Continue)),
            Command::Disconnect => {
                info!(channel = %self.id(), "client disconnected");
                Ok(Handled::Done(Flow::Disconnect))
            }
            Command::Subscribe => {
                let id = required(frame.subscription(), header::ID)?;
                let destination = required(frame.destination(), header::DESTINATION)?;
                self.broker.prefixes().route(destination)?;
                self.broker.on_subscribe(self.id(), id, destination).await?;
                Ok(Handled::Done(Flow::Continue))
            }
            Command::Unsubscribe => {
                let id = required(frame.subscription(), header::ID)?;
                self.broker.on_unsubscribe(self.id(), id)?;
                Ok(Handled::Done(Flow::Continue))
            }
            Command::Send => self.send(frame).await,
            Command::Connected | Command::Message | Command::Receipt | Command::Error => {
                Err(SessionError::ServerCommand(command))
            }
        }
    }

    fn connect(&mut self, frame: &Frame) -> Result<(), SessionError> {
        if self.connected {
            return Err(SessionError::AlreadyConnected);
        }
        let offered = frame.header(header::ACCEPT_VERSION).unwrap_or("1.0");
        let version = negotiate_version(offered).ok_or_else(|| SessionError::UnsupportedVersion {
            offered: offered.to_string(),
        })?;

        let session = uuid::Uuid::new_v4().to_string();
        {
            let mut metadata = self.channel.metadata.write();
            metadata.session = Some(session.clone());
            metadata.version = Some(version.to_string());
        }
        self.connected = true;

        info!(channel = %self.id(), %session, version, "client connected");
        self.reply(Frame::connected(version, &session, SERVER_NAME));
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<Handled, SessionError> {
        let destination = required(frame.destination(), header::DESTINATION)?.to_string();
        let route = self.broker.prefixes().route(&destination)?;
        let body = frame.into_body();

        match route {
            Route::Application(_) => {
                match self.dispatcher.dispatch(self.id(), &destination, body).await? {
                    DispatchOutcome::Failed => Ok(Handled::Reported),
                    _ => Ok(Handled::Done(Flow::Continue)),
                }
            }
            Route::Broker(_) => {
                self.broker.publish_from(self.id(), &destination, body).await?;
                Ok(Handled::Done(Flow::Continue))
            }
            Route::Unroutable => Err(RouteError::Unroutable {
                destination: destination.clone(),
            }
            .into()),
        }
    }

    fn reply(&self, frame: Frame) {
        if let Err(e) = self.channel.try_send(frame) {
            debug!(channel = %self.id(), error = %e, "reply dropped");
        }
    }
}

fn required<'f>(value: Option<&'f str>, name: &'static str) -> Result<&'f str, SessionError> {
    value.ok_or(SessionError::MissingHeader { name })
}

/// Picks the highest supported version from a comma-separated `accept-version`.
fn negotiate_version(offered: &str) -> Option<&'static str> {
    SUPPORTED_VERSIONS
        .into_iter()
        .find(|supported| offered.split(',').any(|v| v.trim() == *supported))
}
