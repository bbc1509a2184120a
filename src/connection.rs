//! WebSocket connection facade.
//!
//! [`WebSocket`] wraps an upgraded byte stream with the frame codec, the
//! message assembler, and the close handshake, and exposes the
//! application-facing operations: `recv`, `send`, `ping`, `close`,
//! `wait_closed`.
//!
//! Each connection is driven by the single task that owns it: all methods
//! take `&mut self`, so there is exactly one reader and one writer and no
//! internal locking. Frame writes are atomic — a control frame may be
//! emitted between two outbound fragments but never inside a frame.
//!
//! # Cancel-Safety
//!
//! Dropping a suspended `recv`/`send`/`ping`/`close` future can leave a
//! frame partially written or partially parsed. Treat cancellation as a
//! hard abort: drop the connection. The engine does not attempt a graceful
//! close on cancel because it cannot guarantee forward progress.

use crate::close::{CloseHandshake, CloseReason, CloseState};
use crate::frame::{Frame, FrameCodec, Opcode, Role, WsError};
use crate::message::{Message, MessageAssembler};
use bytes::{Bytes, BytesMut};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

/// Maximum control frame payload (RFC 6455 §5.5).
const MAX_CONTROL_PAYLOAD: usize = 125;

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Maximum frame payload size.
    pub max_frame_size: usize,
    /// Maximum assembled message size.
    pub max_message_size: usize,
    /// How long to wait for the peer's close frame after sending ours.
    pub close_timeout: Duration,
    /// Server-side limit on the upgrade-request exchange.
    pub handshake_timeout: Duration,
    /// Bound on the whole client connect (TCP + TLS + upgrade); `None`
    /// leaves pacing to the caller.
    pub connect_timeout: Option<Duration>,
    /// Idle keepalive: send a Ping when `recv` has seen no frame for this
    /// long. Disabled by default.
    pub ping_interval: Option<Duration>,
    /// Subprotocols, in preference order.
    pub subprotocols: Vec<String>,
    /// Origin header for client handshakes.
    pub origin: Option<String>,
    /// Enable TCP_NODELAY on client connections.
    pub nodelay: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_frame_size: FrameCodec::DEFAULT_MAX_FRAME_SIZE,
            max_message_size: 16 * 1024 * 1024,
            close_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: None,
            ping_interval: None,
            subprotocols: Vec::new(),
            origin: None,
            nodelay: true,
        }
    }
}

impl WebSocketConfig {
    /// Create a new configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum frame payload size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the maximum assembled message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the close handshake timeout.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set the server-side handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Bound the whole client connect operation.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Enable idle keepalive pings.
    #[must_use]
    pub fn ping_interval(mut self, interval: Option<Duration>) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Add a subprotocol to offer (client) or support (server).
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Set the Origin header for client handshakes.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Enable or disable TCP_NODELAY on client connections.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }
}

/// A WebSocket connection over an upgraded byte stream.
///
/// Created by [`connect`](crate::connect) on the client side, by
/// [`WebSocketAcceptor`](crate::WebSocketAcceptor) on the server side, or
/// from any already-upgraded stream with [`WebSocket::from_upgraded`].
pub struct WebSocket<S> {
    io: S,
    codec: FrameCodec,
    read_buf: BytesMut,
    write_buf: BytesMut,
    assembler: MessageAssembler,
    close_handshake: CloseHandshake,
    config: WebSocketConfig,
    /// Negotiated subprotocol, if any.
    protocol: Option<String>,
    /// Peer address, when the transport has one.
    peer_addr: Option<SocketAddr>,
    /// Messages completed while another operation was driving the read
    /// loop (e.g. while `ping` waited for its Pong).
    inbox: VecDeque<Message>,
    /// Payloads of pings awaiting a pong, oldest first.
    outstanding_pings: VecDeque<Bytes>,
}

impl<S> WebSocket<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an already-upgraded I/O stream.
    ///
    /// Use this when the HTTP upgrade was performed elsewhere (for example
    /// inside an existing HTTP server).
    #[must_use]
    pub fn from_upgraded(io: S, role: Role, config: WebSocketConfig) -> Self {
        let codec = FrameCodec::new(role).max_frame_size(config.max_frame_size);
        let assembler = MessageAssembler::new(config.max_message_size);
        Self {
            io,
            codec,
            read_buf: BytesMut::with_capacity(8192),
            write_buf: BytesMut::with_capacity(8192),
            assembler,
            close_handshake: CloseHandshake::new(),
            config,
            protocol: None,
            peer_addr: None,
            inbox: VecDeque::new(),
            outstanding_pings: VecDeque::new(),
        }
    }

    /// Seed the read buffer with bytes that arrived behind the handshake.
    pub(crate) fn prime_read_buf(&mut self, leftover: BytesMut) {
        debug_assert!(self.read_buf.is_empty());
        self.read_buf = leftover;
    }

    pub(crate) fn set_protocol(&mut self, protocol: Option<String>) {
        self.protocol = protocol;
    }

    pub(crate) fn set_peer_addr(&mut self, addr: SocketAddr) {
        self.peer_addr = Some(addr);
    }

    /// The negotiated subprotocol, if any.
    #[must_use]
    pub fn subprotocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// The peer's socket address, when the transport provided one.
    #[must_use]
    pub fn remote_address(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Check if the connection is open for data.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.close_handshake.is_open()
    }

    /// Check if the close handshake is complete.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.close_handshake.is_closed()
    }

    /// The close handshake state.
    #[must_use]
    pub fn close_state(&self) -> CloseState {
        self.close_handshake.state()
    }

    /// The effective close code, once the connection has begun closing:
    /// the peer's code when they sent one, the code we closed with
    /// otherwise, 1005 for an empty peer close, 1006 for abnormal
    /// termination.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        self.close_handshake.reason().map(|r| r.code)
    }

    /// The close reason text, if any.
    #[must_use]
    pub fn close_reason(&self) -> Option<&str> {
        self.close_handshake.reason().map(|r| r.reason.as_str())
    }

    /// Receive the next application message.
    ///
    /// Control frames are handled internally and never surface. Returns
    /// `None` once the close handshake completes or the transport dies;
    /// the cause is available from [`close_code`](Self::close_code) and
    /// [`close_reason`](Self::close_reason).
    pub async fn recv(&mut self) -> Option<Message> {
        if let Some(msg) = self.inbox.pop_front() {
            return Some(msg);
        }

        while !self.close_handshake.is_closed() {
            match self.advance().await {
                Ok(Some(msg)) => return Some(msg),
                Ok(None) => {}
                Err(err) => {
                    self.fail(&err).await;
                    return None;
                }
            }
        }
        None
    }

    /// Send a message as a single frame.
    ///
    /// # Errors
    ///
    /// `WsError::NotOpen` if the connection is not open,
    /// `WsError::PayloadTooLarge` when the payload exceeds
    /// `max_frame_size`, or the underlying I/O error.
    pub async fn send(&mut self, msg: impl Into<Message>) -> Result<(), WsError> {
        let msg = msg.into();
        if !self.close_handshake.is_open() {
            return Err(WsError::NotOpen);
        }
        if msg.len() > self.config.max_frame_size {
            return Err(WsError::PayloadTooLarge {
                size: msg.len() as u64,
                max: self.config.max_frame_size,
            });
        }

        let opcode = msg.opcode();
        let frame = Frame::fragment(opcode, true, msg.into_payload());
        self.send_frame(frame).await
    }

    /// Send a message split across fragments of at most `fragment_size`
    /// payload bytes.
    ///
    /// Text payloads may split inside a code point; the receiver reassembles
    /// before validating, as RFC 6455 requires.
    ///
    /// # Errors
    ///
    /// Same conditions as [`send`](Self::send).
    pub async fn send_fragmented(
        &mut self,
        msg: impl Into<Message>,
        fragment_size: usize,
    ) -> Result<(), WsError> {
        let msg = msg.into();
        if !self.close_handshake.is_open() {
            return Err(WsError::NotOpen);
        }

        let opcode = msg.opcode();
        let payload = msg.into_payload();

        if fragment_size == 0 || payload.len() <= fragment_size {
            let frame = Frame::fragment(opcode, true, payload);
            return self.send_frame(frame).await;
        }

        let mut offset = 0;
        let mut first = true;
        while offset < payload.len() {
            let end = usize::min(offset + fragment_size, payload.len());
            let fin = end == payload.len();
            let opcode = if first { opcode } else { Opcode::Continuation };
            let frame = Frame::fragment(opcode, fin, payload.slice(offset..end));
            self.send_frame(frame).await?;
            first = false;
            offset = end;
        }
        Ok(())
    }

    /// Send a Ping and wait for the matching Pong.
    ///
    /// Matching is by payload equality against the oldest outstanding ping.
    /// Returns when the Pong arrives or the connection closes; messages
    /// received while waiting are queued for later [`recv`](Self::recv)
    /// calls in arrival order.
    ///
    /// # Errors
    ///
    /// `WsError::NotOpen` when the connection is not open, or
    /// `WsError::ControlFrameTooLarge` for payloads over 125 bytes.
    pub async fn ping(&mut self, payload: impl Into<Bytes>) -> Result<(), WsError> {
        let payload = payload.into();
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WsError::ControlFrameTooLarge(payload.len()));
        }
        if !self.close_handshake.is_open() {
            return Err(WsError::NotOpen);
        }

        self.send_frame(Frame::ping(payload.clone())).await?;
        self.outstanding_pings.push_back(payload.clone());

        while self.outstanding_pings.contains(&payload) && !self.close_handshake.is_closed() {
            match self.advance().await {
                Ok(Some(msg)) => self.inbox.push_back(msg),
                Ok(None) => {}
                Err(err) => {
                    self.fail(&err).await;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Run the closing handshake.
    ///
    /// Sends a Close frame with `code` and `reason`, then waits up to
    /// `close_timeout` for the peer's Close; the connection ends up in the
    /// closed state and the transport is shut down either way. Incoming
    /// data frames are discarded while waiting; control frames are still
    /// processed.
    ///
    /// # Errors
    ///
    /// `WsError::InvalidCloseCode` when `code` may not be sent on the wire,
    /// `WsError::ControlFrameTooLarge` when the reason pushes the payload
    /// over 125 bytes, or the underlying I/O error while sending.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), WsError> {
        if !crate::frame::CloseCode::is_valid_code(code) {
            return Err(WsError::InvalidCloseCode(code));
        }
        if 2 + reason.len() > MAX_CONTROL_PAYLOAD {
            return Err(WsError::ControlFrameTooLarge(2 + reason.len()));
        }

        if let Some(frame) = self.close_handshake.initiate(CloseReason::new(code, reason)) {
            self.send_frame(frame).await?;
        }

        if self.close_handshake.is_closed() {
            // We were answering the peer's close; the handshake is done.
            self.shutdown_transport().await;
            return Ok(());
        }

        let deadline = self.config.close_timeout;
        if tokio::time::timeout(deadline, self.drain_until_closed())
            .await
            .is_err()
        {
            self.close_handshake.force_close(CloseReason::going_away());
        }
        self.shutdown_transport().await;
        Ok(())
    }

    /// Drive the connection until the close handshake completes (or the
    /// transport dies), discarding incoming data.
    pub async fn wait_closed(&mut self) {
        self.drain_until_closed().await;
        self.shutdown_transport().await;
    }

    /// Read frames until closed, discarding completed data messages.
    async fn drain_until_closed(&mut self) {
        while !self.close_handshake.is_closed() {
            match self.advance().await {
                Ok(_) => {}
                Err(err) => {
                    self.fail(&err).await;
                    break;
                }
            }
        }
    }

    /// Read and handle one frame (or one keepalive tick).
    ///
    /// Returns a completed application message, if this frame finished one.
    async fn advance(&mut self) -> Result<Option<Message>, WsError> {
        let frame = match self.config.ping_interval {
            Some(interval) if self.close_handshake.is_open() => {
                match tokio::time::timeout(interval, Self::next_frame(
                    &mut self.io,
                    &mut self.codec,
                    &mut self.read_buf,
                ))
                .await
                {
                    Ok(frame) => frame?,
                    Err(_) => {
                        // Idle: nudge the peer and go around.
                        self.send_frame(Frame::ping(Bytes::new())).await?;
                        return Ok(None);
                    }
                }
            }
            _ => Self::next_frame(&mut self.io, &mut self.codec, &mut self.read_buf).await?,
        };

        match frame {
            Some(frame) => self.handle_frame(frame).await,
            None => {
                // EOF without a close handshake.
                self.close_handshake.force_close(CloseReason::abnormal());
                self.shutdown_transport().await;
                Ok(None)
            }
        }
    }

    /// Decode the next frame, reading from the transport as needed.
    ///
    /// Returns `None` on clean EOF at a frame boundary.
    async fn next_frame(
        io: &mut S,
        codec: &mut FrameCodec,
        read_buf: &mut BytesMut,
    ) -> Result<Option<Frame>, WsError> {
        loop {
            if let Some(frame) = codec.decode(read_buf)? {
                return Ok(Some(frame));
            }

            let n = io.read_buf(read_buf).await?;
            if n == 0 {
                if read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(WsError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "transport closed inside a frame",
                )));
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<Option<Message>, WsError> {
        match frame.opcode {
            Opcode::Ping => {
                // Echo before any further data frame is read or written.
                self.send_frame(Frame::pong(frame.payload)).await?;
                Ok(None)
            }
            Opcode::Pong => {
                // A pong resolves the oldest outstanding ping when the
                // payloads match; anything else is informational.
                if self.outstanding_pings.front() == Some(&frame.payload) {
                    self.outstanding_pings.pop_front();
                }
                Ok(None)
            }
            Opcode::Close => {
                let echo = self.close_handshake.receive(&frame)?;
                if let Some(echo) = echo {
                    self.send_frame(echo).await?;
                    self.close_handshake.echo_sent();
                }
                if self.close_handshake.is_closed() {
                    self.shutdown_transport().await;
                }
                Ok(None)
            }
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                if !self.close_handshake.is_open() {
                    // Data after we sent Close is discarded.
                    return Ok(None);
                }
                self.assembler.push(frame)
            }
        }
    }

    /// Terminate the connection on a protocol or transport error: tell the
    /// peer why (when the code is sendable and a close frame can still go
    /// out), record the reason, and shut the transport down.
    async fn fail(&mut self, err: &WsError) {
        let code = err.close_code();
        tracing::warn!(error = %err, code = u16::from(code), "websocket connection failed");

        if code.is_sendable() {
            if let Some(frame) = self
                .close_handshake
                .initiate(CloseReason::from_code(code))
            {
                let _ = self.send_frame(frame).await;
            }
        }
        self.close_handshake.force_close(CloseReason::from_code(code));
        self.shutdown_transport().await;
    }

    /// Encode and write one frame atomically.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), WsError> {
        self.write_buf.clear();
        self.codec.encode(frame, &mut self.write_buf)?;
        self.io.write_all(&self.write_buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    async fn shutdown_transport(&mut self) {
        let _ = self.io.shutdown().await;
    }
}

impl<S> std::fmt::Debug for WebSocket<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocket")
            .field("state", &self.close_handshake.state())
            .field("protocol", &self.protocol)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn pair() -> (WebSocket<DuplexStream>, WebSocket<DuplexStream>) {
        pair_with(WebSocketConfig::default(), WebSocketConfig::default())
    }

    fn pair_with(
        client_config: WebSocketConfig,
        server_config: WebSocketConfig,
    ) -> (WebSocket<DuplexStream>, WebSocket<DuplexStream>) {
        let (a, b) = duplex(256 * 1024);
        let client = WebSocket::from_upgraded(a, Role::Client, client_config);
        let server = WebSocket::from_upgraded(b, Role::Server, server_config);
        (client, server)
    }

    #[tokio::test]
    async fn text_roundtrip() {
        let (mut client, mut server) = pair();

        client.send(Message::text("hello")).await.unwrap();
        assert_eq!(server.recv().await, Some(Message::text("hello")));

        server.send(Message::text("world")).await.unwrap();
        assert_eq!(client.recv().await, Some(Message::text("world")));
    }

    #[tokio::test]
    async fn binary_roundtrip() {
        let (mut client, mut server) = pair();
        let payload = (0u8..=255).collect::<Vec<u8>>();

        client.send(Message::binary(payload.clone())).await.unwrap();
        assert_eq!(server.recv().await, Some(Message::binary(payload)));
    }

    #[tokio::test]
    async fn fragmented_send_reassembles() {
        let (mut client, mut server) = pair();

        client
            .send_fragmented(Message::text("fragmented message"), 5)
            .await
            .unwrap();
        assert_eq!(server.recv().await, Some(Message::text("fragmented message")));
    }

    #[tokio::test]
    async fn fragmented_text_may_split_code_points() {
        let (mut client, mut server) = pair();

        // 1-byte fragments cut every multi-byte code point.
        client
            .send_fragmented(Message::text("héllo wörld"), 1)
            .await
            .unwrap();
        assert_eq!(server.recv().await, Some(Message::text("héllo wörld")));
    }

    #[tokio::test]
    async fn ping_resolves_on_pong() {
        let (mut client, mut server) = pair();

        tokio::join!(
            async {
                // ping() answers only once the pong arrives, queueing the
                // data message that lands first.
                client.ping(&b"are-you-there"[..]).await.unwrap();
                client.send(Message::text("done")).await.unwrap();
            },
            async {
                server.send(Message::text("data")).await.unwrap();
                // recv answers the ping internally, then sees "done".
                assert_eq!(server.recv().await, Some(Message::text("done")));
            }
        );

        // The data message that arrived while waiting is not lost.
        assert_eq!(client.recv().await, Some(Message::text("data")));
        assert!(client.outstanding_pings.is_empty());
    }

    #[tokio::test]
    async fn server_answers_ping_before_reading_on() {
        let (mut client, mut server) = pair();

        client.ping_no_wait(&b"probe"[..]).await.unwrap();
        client.send(Message::text("after")).await.unwrap();

        // recv handles the ping (sending a pong) and returns the data.
        assert_eq!(server.recv().await, Some(Message::text("after")));

        // The client's next read sees the pong before the server sends
        // anything else; its outstanding queue drains.
        server.send(Message::text("reply")).await.unwrap();
        assert_eq!(client.recv().await, Some(Message::text("reply")));
        assert!(client.outstanding_pings.is_empty());
    }

    #[tokio::test]
    async fn close_handshake_initiator() {
        let (mut client, mut server) = pair();

        let (close_result, _) = tokio::join!(client.close(1000, "bye"), async move {
            // Peer drains to None, echoing the close on the way.
            assert_eq!(server.recv().await, None);
            assert_eq!(server.close_code(), Some(1000));
            assert_eq!(server.close_reason(), Some("bye"));
        });
        close_result.unwrap();

        assert!(client.is_closed());
        assert_eq!(client.close_code(), Some(1000));
    }

    #[tokio::test]
    async fn close_times_out_without_peer_echo() {
        let (config, server_config) = (
            WebSocketConfig::new().close_timeout(Duration::from_millis(50)),
            WebSocketConfig::default(),
        );
        let (mut client, server) = pair_with(config, server_config);
        // The server never reads or answers.
        let _hold = server;

        client.close(1000, "").await.unwrap();
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn recv_returns_none_after_peer_close() {
        let (mut client, mut server) = pair();

        let (_, recv_side) = tokio::join!(client.close(1001, ""), async move {
            let got = server.recv().await;
            (got, server.close_code())
        });
        assert_eq!(recv_side.0, None);
        assert_eq!(recv_side.1, Some(1001));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut client, server) = pair();
        drop(server);

        client.close_handshake.force_close(CloseReason::normal());
        let err = client.send(Message::text("late")).await.unwrap_err();
        assert!(matches!(err, WsError::NotOpen));
    }

    #[tokio::test]
    async fn close_rejects_forbidden_codes() {
        let (mut client, _server) = pair();
        for code in [999u16, 1005, 1006, 1015, 2999] {
            let err = client.close(code, "").await.unwrap_err();
            assert!(matches!(err, WsError::InvalidCloseCode(c) if c == code));
        }
        // Still open: nothing was sent.
        assert!(client.is_open());
    }

    #[tokio::test]
    async fn oversize_ping_rejected() {
        let (mut client, _server) = pair();
        let err = client.ping(vec![0u8; 126]).await.unwrap_err();
        assert!(matches!(err, WsError::ControlFrameTooLarge(126)));
    }

    #[tokio::test]
    async fn protocol_error_closes_with_1002() {
        let (mut client, mut server) = pair();

        // An orphan continuation frame violates the assembly rules.
        client
            .send_frame(Frame::fragment(Opcode::Continuation, true, "tail"))
            .await
            .unwrap();

        assert_eq!(server.recv().await, None);
        assert_eq!(server.close_code(), Some(1002));
    }

    #[tokio::test]
    async fn invalid_utf8_closes_with_1007() {
        let (mut client, mut server) = pair();

        client
            .send_frame(Frame::fragment(Opcode::Text, false, vec![0xC3u8]))
            .await
            .unwrap();
        client
            .send_frame(Frame::fragment(Opcode::Continuation, true, vec![0x28u8]))
            .await
            .unwrap();

        assert_eq!(server.recv().await, None);
        assert_eq!(server.close_code(), Some(1007));
    }

    #[tokio::test]
    async fn oversize_message_closes_with_1009() {
        let (mut client, mut server) = pair_with(
            WebSocketConfig::default(),
            WebSocketConfig::new().max_message_size(16),
        );

        client.send(Message::binary(vec![0u8; 32])).await.unwrap();

        assert_eq!(server.recv().await, None);
        assert_eq!(server.close_code(), Some(1009));
    }

    #[tokio::test]
    async fn transport_death_reports_1006() {
        let (mut client, server) = pair();
        drop(server);

        assert_eq!(client.recv().await, None);
        assert_eq!(client.close_code(), Some(1006));
    }

    #[tokio::test]
    async fn ping_between_fragments_is_answered_mid_message() {
        let (mut client, mut server) = pair();

        client
            .send_frame(Frame::fragment(Opcode::Text, false, "he"))
            .await
            .unwrap();
        client.ping_no_wait(&b"mid"[..]).await.unwrap();
        client
            .send_frame(Frame::fragment(Opcode::Continuation, true, "llo"))
            .await
            .unwrap();

        // Assembly survives the interleaved ping.
        assert_eq!(server.recv().await, Some(Message::text("hello")));

        // And the pong comes back with the ping payload.
        server.send(Message::text("done")).await.unwrap();
        assert_eq!(client.recv().await, Some(Message::text("done")));
    }

    impl<S> WebSocket<S>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        /// Test helper: send a ping without waiting for the pong.
        async fn ping_no_wait(&mut self, payload: impl Into<Bytes>) -> Result<(), WsError> {
            let payload = payload.into();
            self.send_frame(Frame::ping(payload.clone())).await?;
            self.outstanding_pings.push_back(payload);
            Ok(())
        }
    }
}
