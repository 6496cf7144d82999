//! WebSocket connector
//!
//! Opens one tokio-tungstenite connection per [`Connector::connect`] call.
//! Handshake is bounded by a connect timeout; after that the caller bounds
//! each receive itself.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Once;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

use super::{
    ConnectError, ConnectErrorKind, Connection, Connector, Endpoint, TransportError, WireMessage,
};

/// Default timeout for the TCP + TLS + WebSocket handshake
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

static CRYPTO_PROVIDER: Once = Once::new();

/// rustls refuses to pick a provider on its own when more than one is compiled in
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            log::debug!("WsConnector: rustls crypto provider already installed");
        }
    });
}

/// Opens WebSocket connections to recognition servers
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WsConnector {
    pub fn new() -> Self {
        ensure_crypto_provider();
        Self {
            connect_timeout: CONNECTION_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, ConnectError> {
        let url = endpoint.url();
        log::info!("WsConnector: connecting to {}...", url);

        let (stream, _response) = timeout(
            self.connect_timeout,
            connect_async_with_config(
                url.as_str(),
                None,
                true, // disable_nagle: control messages are tiny
            ),
        )
        .await
        .map_err(|_| {
            ConnectError::new(
                ConnectErrorKind::TimedOut,
                format!("no handshake from {} within {:?}", url, self.connect_timeout),
            )
        })?
        .map_err(|e| classify_ws_error(e, endpoint.use_tls))?;

        log::info!("WsConnector: connected to {}", url);
        Ok(Box::new(WsConnection { stream }))
    }
}

/// Map a handshake error onto a [`ConnectErrorKind`]
fn classify_ws_error(err: WsError, use_tls: bool) -> ConnectError {
    let kind = match &err {
        WsError::Io(io) => match io.kind() {
            std::io::ErrorKind::ConnectionRefused => ConnectErrorKind::Refused,
            std::io::ErrorKind::TimedOut => ConnectErrorKind::TimedOut,
            // tokio-rustls reports alerts and certificate failures as InvalidData
            std::io::ErrorKind::InvalidData if use_tls => ConnectErrorKind::Tls,
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::UnexpectedEof => {
                ConnectErrorKind::Closed
            }
            _ => ConnectErrorKind::Other,
        },
        WsError::Tls(_) => ConnectErrorKind::Tls,
        WsError::ConnectionClosed | WsError::AlreadyClosed => ConnectErrorKind::Closed,
        _ => ConnectErrorKind::Other,
    };
    ConnectError::new(kind, err.to_string())
}

/// One open WebSocket connection
struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        let frame = match message {
            WireMessage::Text(text) => Message::Text(text),
            WireMessage::Binary(data) => Message::Binary(data),
        };

        self.stream.send(frame).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                TransportError::Closed(e.to_string())
            }
            other => TransportError::SendFailed(other.to_string()),
        })
    }

    async fn recv_text(&mut self) -> Result<Option<String>, TransportError> {
        while let Some(msg_result) = self.stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Close(frame)) => {
                    log::info!("WsConnection: closed by server ({:?})", frame);
                    return Ok(None);
                }
                Ok(_) => {} // Ignore ping/pong/binary
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                Err(e) => return Err(TransportError::ReceiveFailed(e.to_string())),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            log::debug!("WsConnection: error closing WebSocket: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_classify_io_errors() {
        let refused = WsError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert_eq!(classify_ws_error(refused, false).kind, ConnectErrorKind::Refused);

        let timed_out = WsError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert_eq!(classify_ws_error(timed_out, false).kind, ConnectErrorKind::TimedOut);

        let bad_cert = WsError::Io(io::Error::new(io::ErrorKind::InvalidData, "UnknownIssuer"));
        assert_eq!(classify_ws_error(bad_cert, true).kind, ConnectErrorKind::Tls);

        let garbage = WsError::Io(io::Error::new(io::ErrorKind::InvalidData, "garbage"));
        assert_eq!(classify_ws_error(garbage, false).kind, ConnectErrorKind::Other);
    }

    #[test]
    fn test_classify_closed() {
        let err = classify_ws_error(WsError::ConnectionClosed, false);
        assert_eq!(err.kind, ConnectErrorKind::Closed);
    }

    #[test]
    fn test_connector_timeout_builder() {
        let connector = WsConnector::new().with_connect_timeout(Duration::from_millis(250));
        assert_eq!(connector.connect_timeout(), Duration::from_millis(250));
        assert_eq!(WsConnector::default().connect_timeout(), CONNECTION_TIMEOUT);
    }

    #[tokio::test]
    async fn test_connect_refused_is_classified() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = WsConnector::new();
        let result = connector
            .connect(&Endpoint::new("127.0.0.1", port, false))
            .await;

        match result {
            Err(err) => assert_eq!(err.kind, ConnectErrorKind::Refused),
            Ok(_) => panic!("Expected connection to be refused"),
        }
    }

    #[tokio::test]
    #[ignore] // Requires a running recognition server
    async fn test_live_connection() {
        let host = std::env::var("FUNASR_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = std::env::var("FUNASR_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(10095);

        let connector = WsConnector::new();
        let mut conn = connector
            .connect(&Endpoint::new(host, port, false))
            .await
            .expect("Connection failed");
        conn.close().await;
    }
}
