//! WebSocket client: dial a `ws://` or `wss://` URL and upgrade.
//!
//! # Example
//!
//! ```ignore
//! use websock::{connect, Message};
//!
//! let mut ws = connect("ws://127.0.0.1:8000/chat").await?;
//! ws.send(Message::text("Hello!")).await?;
//! while let Some(msg) = ws.recv().await {
//!     println!("received: {msg:?}");
//! }
//! ```

use crate::connection::{WebSocket, WebSocketConfig};
use crate::frame::Role;
use crate::handshake::{read_until_headers, ClientHandshake, HandshakeError, HttpResponse, WsUrl};
use crate::stream::MaybeTlsStream;
use std::io;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// WebSocket connect errors.
#[derive(Debug)]
pub enum WsConnectError {
    /// URL parsing or upgrade validation failed.
    Handshake(HandshakeError),
    /// I/O error while connecting or upgrading.
    Io(io::Error),
    /// The URL requires TLS (`wss://`) but the `tls` feature is disabled.
    TlsRequired,
    /// The configured connect timeout elapsed.
    Timeout,
}

impl std::fmt::Display for WsConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::TlsRequired => write!(f, "wss:// requires the 'tls' feature"),
            Self::Timeout => write!(f, "connect timed out"),
        }
    }
}

impl std::error::Error for WsConnectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handshake(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HandshakeError> for WsConnectError {
    fn from(err: HandshakeError) -> Self {
        Self::Handshake(err)
    }
}

impl From<io::Error> for WsConnectError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Connect to a WebSocket server with the default configuration.
///
/// # Errors
///
/// Fails on invalid URLs, connection errors, and any deviation from the
/// upgrade handshake (non-101 status, bad accept hash, unoffered
/// subprotocol).
pub async fn connect(url: &str) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, WsConnectError> {
    connect_with_config(url, WebSocketConfig::default()).await
}

/// Connect to a WebSocket server with a custom configuration.
///
/// Subprotocols, the Origin header, and the connect timeout all come from
/// `config`.
///
/// # Errors
///
/// Same conditions as [`connect`], plus `WsConnectError::Timeout` when
/// `config.connect_timeout` elapses.
pub async fn connect_with_config(
    url: &str,
    config: WebSocketConfig,
) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, WsConnectError> {
    match config.connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect_inner(url, config))
            .await
            .map_err(|_| WsConnectError::Timeout)?,
        None => connect_inner(url, config).await,
    }
}

async fn connect_inner(
    url: &str,
    config: WebSocketConfig,
) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, WsConnectError> {
    let parsed = WsUrl::parse(url)?;

    let tcp = TcpStream::connect((parsed.host.as_str(), parsed.port)).await?;
    if config.nodelay {
        let _ = tcp.set_nodelay(true);
    }
    let peer_addr = tcp.peer_addr().ok();

    let stream = wrap_transport(tcp, &parsed).await?;
    let mut ws = perform_handshake(stream, &parsed, config).await?;
    if let Some(addr) = peer_addr {
        ws.set_peer_addr(addr);
    }

    tracing::debug!(
        host = %parsed.host,
        port = parsed.port,
        protocol = ?ws.subprotocol(),
        "websocket connected"
    );
    Ok(ws)
}

#[cfg(not(feature = "tls"))]
async fn wrap_transport(
    tcp: TcpStream,
    url: &WsUrl,
) -> Result<MaybeTlsStream<TcpStream>, WsConnectError> {
    if url.tls {
        return Err(WsConnectError::TlsRequired);
    }
    Ok(MaybeTlsStream::Plain(tcp))
}

#[cfg(feature = "tls")]
async fn wrap_transport(
    tcp: TcpStream,
    url: &WsUrl,
) -> Result<MaybeTlsStream<TcpStream>, WsConnectError> {
    use std::sync::Arc;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    if !url.tls {
        return Ok(MaybeTlsStream::Plain(tcp));
    }

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    let connector = tokio_rustls::TlsConnector::from(Arc::new(tls_config));
    let name = ServerName::try_from(url.host.clone())
        .map_err(|_| HandshakeError::InvalidUrl("host is not a valid TLS server name".into()))?;

    let tls = connector.connect(name, tcp).await?;
    Ok(MaybeTlsStream::Tls(tls))
}

/// Connect `wss://` through a caller-supplied TLS connector, for custom
/// roots or client certificates.
///
/// # Errors
///
/// Same conditions as [`connect_with_config`].
#[cfg(feature = "tls")]
pub async fn connect_tls_with(
    url: &str,
    config: WebSocketConfig,
    connector: tokio_rustls::TlsConnector,
) -> Result<WebSocket<MaybeTlsStream<TcpStream>>, WsConnectError> {
    use tokio_rustls::rustls::pki_types::ServerName;

    let parsed = WsUrl::parse(url)?;

    let tcp = TcpStream::connect((parsed.host.as_str(), parsed.port)).await?;
    if config.nodelay {
        let _ = tcp.set_nodelay(true);
    }
    let peer_addr = tcp.peer_addr().ok();

    let stream = if parsed.tls {
        let name = ServerName::try_from(parsed.host.clone()).map_err(|_| {
            HandshakeError::InvalidUrl("host is not a valid TLS server name".into())
        })?;
        MaybeTlsStream::Tls(connector.connect(name, tcp).await?)
    } else {
        MaybeTlsStream::Plain(tcp)
    };

    let mut ws = perform_handshake(stream, &parsed, config).await?;
    if let Some(addr) = peer_addr {
        ws.set_peer_addr(addr);
    }
    Ok(ws)
}

/// Send the upgrade request and validate the response over an established
/// transport.
async fn perform_handshake<S>(
    mut stream: S,
    url: &WsUrl,
    config: WebSocketConfig,
) -> Result<WebSocket<S>, WsConnectError>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let scheme = if url.tls { "wss" } else { "ws" };
    let mut handshake =
        ClientHandshake::new(&format!("{scheme}://{}:{}{}", url.host, url.port, url.path))?;

    for protocol in &config.subprotocols {
        handshake = handshake.protocol(protocol.as_str());
    }
    if let Some(ref origin) = config.origin {
        handshake = handshake.origin(origin.as_str());
    }

    stream.write_all(&handshake.request_bytes()).await?;
    stream.flush().await?;

    // Frames the server sends right behind the 101 must not be lost.
    let (head, leftover) = read_until_headers(&mut stream).await?;
    let response = HttpResponse::parse(&head)?;
    let protocol = handshake.validate_response(&response)?;

    let mut ws = WebSocket::from_upgraded(stream, Role::Client, config);
    ws.prime_read_buf(leftover);
    ws.set_protocol(protocol);
    Ok(ws)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_rejects_bad_scheme() {
        let err = connect("http://example.com/").await.unwrap_err();
        assert!(matches!(
            err,
            WsConnectError::Handshake(HandshakeError::InvalidUrl(_))
        ));
    }

    #[cfg(not(feature = "tls"))]
    #[tokio::test]
    async fn connect_requires_tls_feature_for_wss() {
        // URL parsing happens before dialing, but the TLS check needs a
        // live socket; use a listener that never speaks.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let err = connect(&format!("wss://{addr}/")).await.unwrap_err();
        assert!(matches!(err, WsConnectError::TlsRequired));
    }

    #[tokio::test]
    async fn connect_times_out() {
        use std::time::Duration;

        // A bound listener that never accepts still completes the TCP
        // handshake, so the timeout fires waiting for the 101.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = WebSocketConfig::new().connect_timeout(Some(Duration::from_millis(100)));
        let err = connect_with_config(&format!("ws://{addr}/"), config)
            .await
            .unwrap_err();
        assert!(matches!(err, WsConnectError::Timeout));
        drop(listener);
    }
}
