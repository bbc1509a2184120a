//! Websock: RFC 6455 WebSocket protocol engine for Tokio.
//!
//! # Overview
//!
//! Websock implements the WebSocket protocol end to end — the HTTP upgrade
//! handshake, the bit-packed frame codec with client-to-server masking,
//! fragmentation and message reassembly with incremental UTF-8 validation,
//! ping/pong, and the closing handshake with status codes — for both client
//! and server endpoints, to the strictness the Autobahn conformance suite
//! probes for.
//!
//! The engine runs one logical task per connection on the caller's runtime:
//! every [`WebSocket`] method takes `&mut self`, so a connection has exactly
//! one driver and needs no internal locking. The transport is any
//! `AsyncRead + AsyncWrite` byte stream; TCP and TLS dialing are provided,
//! but an upgraded stream from elsewhere plugs in via
//! [`WebSocket::from_upgraded`].
//!
//! # Module Structure
//!
//! - [`frame`]: wire format encoding/decoding (RFC 6455 Section 5)
//! - [`handshake`]: HTTP upgrade negotiation (RFC 6455 Section 4)
//! - [`close`]: close handshake protocol (RFC 6455 Section 7)
//! - [`utf8`]: incremental text validation across fragment boundaries
//! - [`message`]: application messages and reassembly
//! - [`connection`]: the connection facade
//! - [`client`] / [`server`]: `connect`, the acceptor, and the listener
//!
//! # Example
//!
//! ```ignore
//! use websock::{connect, serve, Message};
//!
//! // Server: echo every message back.
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
//!
//! // Client.
//! let mut ws = connect("ws://127.0.0.1:8000/").await?;
//! ws.send(Message::text("Hello!")).await?;
//! assert_eq!(ws.recv().await, Some(Message::text("Hello!")));
//! ws.close(1000, "done").await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod client;
pub mod close;
pub mod connection;
pub mod frame;
pub mod handshake;
pub mod message;
pub mod server;
pub mod stream;
pub mod utf8;

// Re-exports for convenient access to the core types.
pub use client::{connect, connect_with_config, WsConnectError};
pub use close::{CloseHandshake, CloseReason, CloseState};
pub use connection::{WebSocket, WebSocketConfig};
pub use frame::{apply_mask, CloseCode, Frame, FrameCodec, Opcode, Role, WsError};
pub use handshake::{
    compute_accept_key, AcceptResponse, ClientHandshake, HandshakeError, HttpRequest,
    HttpResponse, ServerHandshake, WsUrl,
};
pub use message::Message;
pub use server::{serve, serve_with, ServerHandle, WebSocketAcceptor, WsAcceptError};
pub use stream::MaybeTlsStream;
pub use utf8::Utf8Validator;

#[cfg(feature = "tls")]
pub use client::connect_tls_with;
