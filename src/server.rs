//! WebSocket server: upgrade acceptance and the listener factory.
//!
//! [`WebSocketAcceptor`] validates upgrade requests on any byte stream and
//! produces connected [`WebSocket`]s; [`serve`] binds a TCP listener and
//! runs one task per accepted socket on the caller's runtime.
//!
//! # Example
//!
//! ```ignore
//! use websock::{serve, Message};
//!
//! let handle = serve(
//!     |mut ws| async move {
//!         while let Some(msg) = ws.recv().await {
//!             if ws.send(msg).await.is_err() {
//!                 break;
//!             }
//!         }
//!     },
//!     "127.0.0.1",
//!     8000,
//! )
//! .await?;
//! println!("listening on {}", handle.local_addr());
//! ```

use crate::connection::{WebSocket, WebSocketConfig};
use crate::frame::Role;
use crate::handshake::{
    read_until_headers, HandshakeError, HttpRequest, ServerHandshake,
};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// WebSocket accept errors.
#[derive(Debug)]
pub enum WsAcceptError {
    /// Handshake validation failed; a 400 or 426 was sent to the client.
    Handshake(HandshakeError),
    /// The handshake did not complete within the configured timeout.
    Timeout,
    /// I/O error.
    Io(io::Error),
}

impl std::fmt::Display for WsAcceptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Handshake(e) => write!(f, "handshake failed: {e}"),
            Self::Timeout => write!(f, "handshake timed out"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for WsAcceptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Handshake(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Timeout => None,
        }
    }
}

impl From<HandshakeError> for WsAcceptError {
    fn from(err: HandshakeError) -> Self {
        Self::Handshake(err)
    }
}

impl From<io::Error> for WsAcceptError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// WebSocket server acceptor.
///
/// Validates upgrade requests and produces connected [`WebSocket`]s.
/// Failed validations answer the client with `400 Bad Request` (or
/// `426 Upgrade Required` for version mismatches) before returning the
/// error.
#[derive(Debug, Clone, Default)]
pub struct WebSocketAcceptor {
    handshake: ServerHandshake,
    config: WebSocketConfig,
}

impl WebSocketAcceptor {
    /// Create a new acceptor with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an acceptor from a connection configuration, registering its
    /// subprotocols as the supported set.
    #[must_use]
    pub fn with_config(config: WebSocketConfig) -> Self {
        let mut handshake = ServerHandshake::new();
        for protocol in &config.subprotocols {
            handshake = handshake.protocol(protocol.clone());
        }
        Self { handshake, config }
    }

    /// Add a supported subprotocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        let protocol = protocol.into();
        self.handshake = self.handshake.protocol(protocol.clone());
        self.config.subprotocols.push(protocol);
        self
    }

    /// Set the maximum frame payload size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set the maximum assembled message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    /// Accept a WebSocket upgrade by reading the HTTP request from the
    /// stream.
    ///
    /// Reads until the header terminator (hard cap 8 KiB), validates the
    /// upgrade, answers with 101, and returns the connected WebSocket.
    /// Bytes a client pipelined behind the request are preserved.
    ///
    /// # Errors
    ///
    /// On validation failure the stream receives a 400 (or 426) response
    /// and `WsAcceptError::Handshake` is returned. Exceeding
    /// `handshake_timeout` returns `WsAcceptError::Timeout`.
    pub async fn accept<S>(&self, stream: S) -> Result<WebSocket<S>, WsAcceptError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match tokio::time::timeout(self.config.handshake_timeout, self.accept_inner(stream)).await
        {
            Ok(result) => result,
            Err(_) => Err(WsAcceptError::Timeout),
        }
    }

    async fn accept_inner<S>(&self, mut stream: S) -> Result<WebSocket<S>, WsAcceptError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (head, leftover) = match read_until_headers(&mut stream).await {
            Ok(parts) => parts,
            Err(err) => {
                if matches!(err, HandshakeError::HeadersTooLarge) {
                    let _ = stream
                        .write_all(&ServerHandshake::reject(400, "Bad Request"))
                        .await;
                    let _ = stream.shutdown().await;
                }
                return Err(err.into());
            }
        };

        let request = match HttpRequest::parse(&head) {
            Ok(request) => request,
            Err(err) => {
                self.send_rejection(&mut stream, &err).await;
                return Err(err.into());
            }
        };

        let accept_response = match self.handshake.accept(&request) {
            Ok(accept) => accept,
            Err(err) => {
                self.send_rejection(&mut stream, &err).await;
                return Err(err.into());
            }
        };

        stream.write_all(&accept_response.response_bytes()).await?;
        stream.flush().await?;

        let mut ws = WebSocket::from_upgraded(stream, Role::Server, self.config.clone());
        ws.prime_read_buf(leftover);
        ws.set_protocol(accept_response.protocol);
        Ok(ws)
    }

    /// Accept from a pre-parsed HTTP request.
    ///
    /// Use this when an existing HTTP server already consumed the request
    /// head and hands over the raw stream.
    ///
    /// # Errors
    ///
    /// Same conditions as [`accept`](Self::accept), without the read phase.
    pub async fn accept_parsed<S>(
        &self,
        request: &HttpRequest,
        mut stream: S,
    ) -> Result<WebSocket<S>, WsAcceptError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let accept_response = match self.handshake.accept(request) {
            Ok(accept) => accept,
            Err(err) => {
                self.send_rejection(&mut stream, &err).await;
                return Err(err.into());
            }
        };

        stream.write_all(&accept_response.response_bytes()).await?;
        stream.flush().await?;

        let mut ws = WebSocket::from_upgraded(stream, Role::Server, self.config.clone());
        ws.set_protocol(accept_response.protocol);
        Ok(ws)
    }

    async fn send_rejection<S>(&self, stream: &mut S, err: &HandshakeError)
    where
        S: AsyncWrite + Unpin,
    {
        let response = match err {
            HandshakeError::UnsupportedVersion(_) => ServerHandshake::reject_version(),
            _ => ServerHandshake::reject(400, "Bad Request"),
        };
        let _ = stream.write_all(&response).await;
        let _ = stream.shutdown().await;
    }
}

/// Handle to a running WebSocket server.
///
/// Dropping the handle does not stop the server; call
/// [`shutdown`](Self::shutdown) to stop accepting and
/// [`closed`](Self::closed) to wait for the accept loop to finish.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// The address the listener is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new connections. Established connections keep
    /// running until their handler returns.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for the accept loop to finish.
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}

/// Start a WebSocket server with the default acceptor.
///
/// `handler` is invoked with each successfully upgraded connection, one
/// spawned task per connection.
///
/// # Errors
///
/// Returns the bind error, if any.
pub async fn serve<F, Fut>(handler: F, host: &str, port: u16) -> io::Result<ServerHandle>
where
    F: Fn(WebSocket<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    serve_with(WebSocketAcceptor::new(), handler, (host, port)).await
}

/// Start a WebSocket server with a custom acceptor.
///
/// # Errors
///
/// Returns the bind error, if any.
pub async fn serve_with<F, Fut>(
    acceptor: WebSocketAcceptor,
    handler: F,
    addr: impl ToSocketAddrs,
) -> io::Result<ServerHandle>
where
    F: Fn(WebSocket<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let handler = Arc::new(handler);

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            tracing::warn!(error = %err, "accept failed");
                            continue;
                        }
                    };

                    let acceptor = acceptor.clone();
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(mut ws) => {
                                ws.set_peer_addr(peer);
                                tracing::debug!(%peer, protocol = ?ws.subprotocol(), "websocket accepted");
                                (*handler)(ws).await;
                            }
                            Err(err) => {
                                tracing::warn!(%peer, error = %err, "websocket upgrade rejected");
                            }
                        }
                    });
                }
            }
        }
        tracing::debug!(%local_addr, "websocket server stopped");
    });

    Ok(ServerHandle {
        local_addr,
        shutdown,
        task,
    })
}
