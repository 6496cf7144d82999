//! Duplex message transport used by the prober
//!
//! The prober only needs to open a connection, send text/binary messages and
//! receive the next text message. [`Connector`] and [`Connection`] are that
//! seam; [`WsConnector`] is the WebSocket implementation and
//! [`ScriptedConnector`] replays canned replies for tests and demos.
//!
//! Connections are opened fresh per use and never pooled.

mod scripted;
mod websocket;

pub use scripted::{ScriptedConnection, ScriptedConnector, ScriptedReply, SentMessage};
pub use websocket::WsConnector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where a recognition server listens
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, use_tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            use_tls,
        }
    }

    /// `ws://host:port/` or `wss://host:port/`, bracketing bare IPv6 hosts
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("{}://[{}]:{}/", scheme, self.host, self.port)
        } else {
            format!("{}://{}:{}/", scheme, self.host, self.port)
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.url())
    }
}

/// Outbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Binary(Vec<u8>),
}

/// Why a connection could not be opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectErrorKind {
    Refused,
    TimedOut,
    Tls,
    Closed,
    Other,
}

impl ConnectErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectErrorKind::Refused => "refused",
            ConnectErrorKind::TimedOut => "timed_out",
            ConnectErrorKind::Tls => "tls",
            ConnectErrorKind::Closed => "closed",
            ConnectErrorKind::Other => "other",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "refused" => Some(ConnectErrorKind::Refused),
            "timed_out" => Some(ConnectErrorKind::TimedOut),
            "tls" => Some(ConnectErrorKind::Tls),
            "closed" => Some(ConnectErrorKind::Closed),
            "other" => Some(ConnectErrorKind::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectErrorKind::Refused => "Connection refused",
            ConnectErrorKind::TimedOut => "Connection timed out",
            ConnectErrorKind::Tls => "TLS handshake failed",
            ConnectErrorKind::Closed => "Connection closed by server",
            ConnectErrorKind::Other => "Connection failed",
        };
        f.write_str(text)
    }
}

/// Failure to open a connection, classified by cause
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ConnectError {
    pub kind: ConnectErrorKind,
    pub detail: String,
}

impl ConnectError {
    pub fn new(kind: ConnectErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// Failure on an already-open connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection closed: {0}")]
    Closed(String),
    #[error("Failed to send message: {0}")]
    SendFailed(String),
    #[error("Failed to receive message: {0}")]
    ReceiveFailed(String),
}

/// An open duplex connection
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Next inbound text message. `Ok(None)` once the peer has closed.
    /// Non-text frames are skipped.
    async fn recv_text(&mut self) -> Result<Option<String>, TransportError>;

    /// Best-effort close; errors are logged, not returned
    async fn close(&mut self);
}

/// Opens one fresh [`Connection`] per call
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectError>;
}
