//! STOMP frame model.
//!
//! A [`Frame`] is one discrete protocol message: a [`Command`], the headers the
//! broker routes on (destination and subscription id), any additional headers
//! in insertion order, and an opaque body. Frames are immutable once built;
//! the builder methods consume and return `self`.
//!
//! The destination and subscription id are held as dedicated fields rather
//! than as plain headers, because which header name carries the subscription
//! id depends on the command (`id` on SUBSCRIBE/UNSUBSCRIBE, `subscription`
//! on MESSAGE).

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::FrameError;

/// Well-known header names.
pub mod header {
    pub const ACCEPT_VERSION: &str = "accept-version";
    pub const CONTENT_LENGTH: &str = "content-length";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const DESTINATION: &str = "destination";
    pub const HEART_BEAT: &str = "heart-beat";
    pub const HOST: &str = "host";
    pub const ID: &str = "id";
    pub const MESSAGE: &str = "message";
    pub const MESSAGE_ID: &str = "message-id";
    pub const RECEIPT: &str = "receipt";
    pub const RECEIPT_ID: &str = "receipt-id";
    pub const SERVER: &str = "server";
    pub const SESSION: &str = "session";
    pub const SUBSCRIPTION: &str = "subscription";
    pub const VERSION: &str = "version";
}

/// Frame command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    /// Client opens a session. `STOMP` is accepted as an alias on parse.
    Connect,
    /// Server accepts a session.
    Connected,
    /// Client registers interest in a destination.
    Subscribe,
    /// Client withdraws a subscription by id.
    Unsubscribe,
    /// Client sends a message to a destination.
    Send,
    /// Server delivers a message to a subscriber.
    Message,
    /// Server acknowledges a client frame carrying a `receipt` header.
    Receipt,
    /// Server reports a failure.
    Error,
    /// Client ends the session.
    Disconnect,
}

impl Command {
    /// Wire name of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Send => "SEND",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }

    /// Looks up a command by its wire name.
    #[must_use]
    pub fn from_wire(name: &str) -> Option<Self> {
        let command = match name {
            "CONNECT" | "STOMP" => Self::Connect,
            "CONNECTED" => Self::Connected,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "SEND" => Self::Send,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            "DISCONNECT" => Self::Disconnect,
            _ => return None,
        };
        Some(command)
    }

    /// Whether `destination` is a routing field for this command.
    #[must_use]
    pub fn carries_destination(self) -> bool {
        matches!(self, Self::Subscribe | Self::Send | Self::Message)
    }

    /// Header name holding the subscription id for this command, if any.
    #[must_use]
    pub fn subscription_header(self) -> Option<&'static str> {
        match self {
            Self::Subscribe | Self::Unsubscribe => Some(header::ID),
            Self::Message => Some(header::SUBSCRIPTION),
            _ => None,
        }
    }

    /// Headers that must be present for a frame of this command to be valid.
    #[must_use]
    pub fn required_headers(self) -> &'static [&'static str] {
        match self {
            Self::Subscribe => &[header::DESTINATION, header::ID],
            Self::Unsubscribe => &[header::ID],
            Self::Send => &[header::DESTINATION],
            Self::Message => &[header::DESTINATION, header::SUBSCRIPTION, header::MESSAGE_ID],
            _ => &[],
        }
    }

    /// Whether only the server may send this command.
    #[must_use]
    pub fn is_server_command(self) -> bool {
        matches!(
            self,
            Self::Connected | Self::Message | Self::Receipt | Self::Error
        )
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    destination: Option<String>,
    subscription: Option<String>,
    headers: Vec<(String, String)>,
    body: Bytes,
}

impl Frame {
    /// Creates a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self {
            command,
            destination: None,
            subscription: None,
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    #[must_use]
    pub fn connect() -> Self {
        Self::new(Command::Connect)
    }

    /// Server answer to CONNECT.
    #[must_use]
    pub fn connected(version: &str, session: &str, server: &str) -> Self {
        Self::new(Command::Connected)
            .with_header(header::VERSION, version)
            .with_header(header::HEART_BEAT, "0,0")
            .with_header(header::SERVER, server)
            .with_header(header::SESSION, session)
    }

    #[must_use]
    pub fn subscribe(id: impl Into<String>, destination: impl Into<String>) -> Self {
        let mut frame = Self::new(Command::Subscribe);
        frame.subscription = Some(id.into());
        frame.destination = Some(destination.into());
        frame
    }

    #[must_use]
    pub fn unsubscribe(id: impl Into<String>) -> Self {
        let mut frame = Self::new(Command::Unsubscribe);
        frame.subscription = Some(id.into());
        frame
    }

    #[must_use]
    pub fn send(destination: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let mut frame = Self::new(Command::Send);
        frame.destination = Some(destination.into());
        frame.body = body.into();
        frame
    }

    /// Delivery of a published body to one subscription.
    #[must_use]
    pub fn message(
        subscription: impl Into<String>,
        destination: impl Into<String>,
        message_id: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        let mut frame = Self::new(Command::Message);
        frame.subscription = Some(subscription.into());
        frame.destination = Some(destination.into());
        frame.body = body.into();
        frame.with_header(header::MESSAGE_ID, message_id)
    }

    #[must_use]
    pub fn receipt(receipt_id: impl Into<String>) -> Self {
        Self::new(Command::Receipt).with_header(header::RECEIPT_ID, receipt_id)
    }

    /// Error report with a short `message` header and a free-form body.
    #[must_use]
    pub fn error(message: impl Into<String>, detail: impl Into<Bytes>) -> Self {
        Self::new(Command::Error)
            .with_header(header::MESSAGE, message)
            .with_body(detail)
    }

    #[must_use]
    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Sets a header, replacing any previous value of the same name.
    ///
    /// `destination` and the command's subscription header are stored in their
    /// routing fields. `content-length` is derived from the body on
    /// serialization and is ignored here.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();

        if name == header::DESTINATION && self.command.carries_destination() {
            self.destination = Some(value);
        } else if self.command.subscription_header() == Some(name.as_str()) {
            self.subscription = Some(value);
        } else if name == header::CONTENT_LENGTH {
            // Derived on serialization.
        } else if let Some(slot) = self.headers.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = value;
        } else {
            self.headers.push((name, value));
        }
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn command(&self) -> Command {
        self.command
    }

    #[must_use]
    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    /// Subscription id (`id` on SUBSCRIBE/UNSUBSCRIBE, `subscription` on MESSAGE).
    #[must_use]
    pub fn subscription(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    /// Looks up any header by name, including the routing fields.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        if name == header::DESTINATION && self.command.carries_destination() {
            return self.destination();
        }
        if self.command.subscription_header() == Some(name) {
            return self.subscription();
        }
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Headers other than the routing fields, in insertion order.
    pub fn extra_headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Checks that every header required by the command is present.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::MalformedFrame` naming the first missing header.
    pub fn validate(&self) -> Result<(), FrameError> {
        for name in self.command.required_headers() {
            if self.header(name).is_none() {
                return Err(FrameError::missing_header(self.command, name));
            }
        }
        Ok(())
    }

    /// Decodes one frame from its wire form.
    ///
    /// # Errors
    ///
    /// Returns `FrameError::MalformedFrame` if the bytes are not a valid frame
    /// or a header required by the command is absent.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        codec::decode(raw)
    }

    /// Encodes the frame to its wire form.
    #[must_use]
    pub fn serialize(&self) -> Bytes {
        codec::encode(self)
    }

    /// Assembles a frame from decoded headers (first occurrence wins).
    pub(crate) fn from_parts(
        command: Command,
        headers: Vec<(String, String)>,
        body: Bytes,
    ) -> Result<Self, FrameError> {
        let mut frame = Self::new(command).with_body(body);
        let mut seen: Vec<&str> = Vec::with_capacity(headers.len());
        for (name, value) in &headers {
            if seen.contains(&name.as_str()) {
                continue;
            }
            seen.push(name);
            frame = frame.with_header(name.clone(), value.clone());
        }
        frame.validate()?;
        Ok(frame)
    }
}
