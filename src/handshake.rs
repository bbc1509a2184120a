//! WebSocket handshake implementation (RFC 6455 Section 4).
//!
//! Implements the HTTP upgrade handshake for both client and server roles.
//!
//! # Client Handshake
//!
//! ```http
//! GET /chat HTTP/1.1
//! Host: server.example.com
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==
//! Sec-WebSocket-Version: 13
//! ```
//!
//! # Server Response
//!
//! ```http
//! HTTP/1.1 101 Switching Protocols
//! Upgrade: websocket
//! Connection: Upgrade
//! Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=
//! ```

use base64::Engine;
use bytes::BytesMut;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// RFC 6455 GUID for Sec-WebSocket-Accept calculation.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Hard cap on the size of a handshake request or response, header
/// terminator included. Exceeding it aborts the handshake.
pub const MAX_HANDSHAKE_BYTES: usize = 8192;

/// Compute the Sec-WebSocket-Accept value from a client key.
///
/// Per RFC 6455 Section 4.2.2:
/// 1. Concatenate the client's Sec-WebSocket-Key with the GUID
/// 2. Take the SHA-1 hash
/// 3. Base64 encode the result
///
/// # Example
///
/// ```
/// use websock::compute_accept_key;
///
/// let client_key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(client_key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(hash)
}

/// Generate a random 16-byte key for the client handshake.
fn generate_client_key() -> String {
    let mut key = [0u8; 16];
    getrandom::fill(&mut key).expect("OS RNG unavailable");
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Read from `io` until the CRLFCRLF header terminator.
///
/// Returns the header block (terminator included) and any bytes that
/// followed it in the same reads; the caller must feed the remainder into
/// the frame decoder, since a peer may pipeline frames right behind the
/// handshake.
pub(crate) async fn read_until_headers<S>(io: &mut S) -> Result<(Vec<u8>, BytesMut), HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(1024);
    loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = buf.split_to(pos + 4);
            return Ok((head.to_vec(), buf));
        }
        if buf.len() > MAX_HANDSHAKE_BYTES {
            return Err(HandshakeError::HeadersTooLarge);
        }

        let n = io.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(HandshakeError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }
    }
}

/// Parsed WebSocket URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsUrl {
    /// Host name or IP address.
    pub host: String,
    /// Port number (default: 80 for ws, 443 for wss).
    pub port: u16,
    /// Request path including any query string (default: "/").
    pub path: String,
    /// Whether TLS is required (wss://).
    pub tls: bool,
}

impl WsUrl {
    /// Parse a WebSocket URL (ws:// or wss://).
    ///
    /// # Errors
    ///
    /// Returns `HandshakeError::InvalidUrl` if the URL is malformed or uses
    /// a scheme other than `ws` / `wss`.
    pub fn parse(url: &str) -> Result<Self, HandshakeError> {
        let (scheme, rest) = url
            .split_once("://")
            .ok_or_else(|| HandshakeError::InvalidUrl("missing scheme".into()))?;

        let tls = match scheme {
            "ws" => false,
            "wss" => true,
            _ => {
                return Err(HandshakeError::InvalidUrl(format!(
                    "unsupported scheme: {scheme}"
                )))
            }
        };

        let default_port = if tls { 443 } else { 80 };

        // Split host:port from path; a bare query counts as the path start.
        let (host_port, path) = match rest.find(['/', '?']) {
            Some(idx) if rest.as_bytes()[idx] == b'?' => {
                (&rest[..idx], format!("/{}", &rest[idx..]))
            }
            Some(idx) => (&rest[..idx], rest[idx..].to_string()),
            None => (rest, "/".to_string()),
        };

        let (host, port) = if let Some(bracket_end) = host_port.find(']') {
            // IPv6: [::1]:8080
            let host = &host_port[1..bracket_end];
            let port = if host_port.len() > bracket_end + 1
                && host_port.as_bytes()[bracket_end + 1] == b':'
            {
                host_port[bracket_end + 2..]
                    .parse()
                    .map_err(|_| HandshakeError::InvalidUrl("invalid port".into()))?
            } else {
                default_port
            };
            (host.to_string(), port)
        } else if let Some(colon_idx) = host_port.rfind(':') {
            let host = &host_port[..colon_idx];
            let port = host_port[colon_idx + 1..]
                .parse()
                .map_err(|_| HandshakeError::InvalidUrl("invalid port".into()))?;
            (host.to_string(), port)
        } else {
            (host_port.to_string(), default_port)
        };

        if host.is_empty() {
            return Err(HandshakeError::InvalidUrl("empty host".into()));
        }

        Ok(Self {
            host,
            port,
            path,
            tls,
        })
    }

    /// Returns the Host header value.
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// WebSocket handshake errors.
#[derive(Debug)]
pub enum HandshakeError {
    /// Invalid URL format.
    InvalidUrl(String),
    /// Invalid HTTP request.
    InvalidRequest(String),
    /// Missing required header.
    MissingHeader(&'static str),
    /// Handshake headers exceeded [`MAX_HANDSHAKE_BYTES`].
    HeadersTooLarge,
    /// Invalid Sec-WebSocket-Key.
    InvalidKey,
    /// Invalid Sec-WebSocket-Accept (response validation).
    InvalidAccept {
        /// Expected accept value.
        expected: String,
        /// Actual accept value.
        actual: String,
    },
    /// Unsupported WebSocket version.
    UnsupportedVersion(String),
    /// Server selected a subprotocol the client never offered.
    ProtocolMismatch {
        /// Protocols the client requested.
        requested: Vec<String>,
        /// Protocol the server selected.
        offered: String,
    },
    /// HTTP response not 101 Switching Protocols.
    NotSwitchingProtocols(u16),
    /// I/O error.
    Io(std::io::Error),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl(msg) => write!(f, "invalid URL: {msg}"),
            Self::InvalidRequest(msg) => write!(f, "invalid HTTP request: {msg}"),
            Self::MissingHeader(name) => write!(f, "missing required header: {name}"),
            Self::HeadersTooLarge => {
                write!(f, "handshake headers exceed {MAX_HANDSHAKE_BYTES} bytes")
            }
            Self::InvalidKey => write!(f, "invalid Sec-WebSocket-Key"),
            Self::InvalidAccept { expected, actual } => {
                write!(
                    f,
                    "invalid Sec-WebSocket-Accept: expected {expected}, got {actual}"
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported WebSocket version: {v}"),
            Self::ProtocolMismatch { requested, offered } => {
                write!(
                    f,
                    "server selected subprotocol {offered:?}, requested {requested:?}"
                )
            }
            Self::NotSwitchingProtocols(status) => {
                write!(f, "expected 101 Switching Protocols, got {status}")
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for HandshakeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HandshakeError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

/// Checks that a `Connection` header value contains the `upgrade` token.
///
/// The header is a comma-separated token list; names are case-insensitive
/// and surrounded by optional whitespace.
fn connection_has_upgrade(value: &str) -> bool {
    value
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

/// Client-side WebSocket handshake configuration.
#[derive(Debug, Clone)]
pub struct ClientHandshake {
    /// Target URL.
    url: WsUrl,
    /// Random client key (base64 encoded).
    key: String,
    /// Requested subprotocols, in preference order.
    protocols: Vec<String>,
    /// Origin header value, if any.
    origin: Option<String>,
    /// Additional headers.
    headers: HashMap<String, String>,
}

impl ClientHandshake {
    /// Create a new client handshake for the given URL.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeError::InvalidUrl` if the URL is malformed.
    pub fn new(url: &str) -> Result<Self, HandshakeError> {
        let parsed_url = WsUrl::parse(url)?;
        Ok(Self {
            url: parsed_url,
            key: generate_client_key(),
            protocols: Vec::new(),
            origin: None,
            headers: HashMap::new(),
        })
    }

    /// Add a subprotocol to request.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Set the Origin header.
    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Add a custom header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns the parsed URL.
    #[must_use]
    pub fn url(&self) -> &WsUrl {
        &self.url
    }

    /// Returns the client key (for validation).
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Generate the HTTP upgrade request as bytes.
    #[must_use]
    pub fn request_bytes(&self) -> Vec<u8> {
        let mut request = format!(
            "GET {} HTTP/1.1\r\n\
             Host: {}\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: 13\r\n",
            self.url.path,
            self.url.host_header(),
            self.key
        );

        if let Some(ref origin) = self.origin {
            request.push_str("Origin: ");
            request.push_str(origin);
            request.push_str("\r\n");
        }

        if !self.protocols.is_empty() {
            request.push_str("Sec-WebSocket-Protocol: ");
            request.push_str(&self.protocols.join(", "));
            request.push_str("\r\n");
        }

        for (name, value) in &self.headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }

        request.push_str("\r\n");
        request.into_bytes()
    }

    /// Validate the server's HTTP response.
    ///
    /// Returns the negotiated subprotocol, if the server selected one.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Status is not 101 Switching Protocols
    /// - Required headers are missing or malformed
    /// - Sec-WebSocket-Accept does not match the key
    /// - The selected subprotocol was never requested
    pub fn validate_response(
        &self,
        response: &HttpResponse,
    ) -> Result<Option<String>, HandshakeError> {
        if response.status != 101 {
            return Err(HandshakeError::NotSwitchingProtocols(response.status));
        }

        let upgrade = response
            .header("upgrade")
            .ok_or(HandshakeError::MissingHeader("Upgrade"))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::InvalidRequest(format!(
                "Upgrade header must be 'websocket', got '{upgrade}'"
            )));
        }

        let connection = response
            .header("connection")
            .ok_or(HandshakeError::MissingHeader("Connection"))?;
        if !connection_has_upgrade(connection) {
            return Err(HandshakeError::InvalidRequest(format!(
                "Connection header must contain 'upgrade', got '{connection}'"
            )));
        }

        let accept = response
            .header("sec-websocket-accept")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Accept"))?;

        let expected = compute_accept_key(&self.key);
        if accept != expected {
            return Err(HandshakeError::InvalidAccept {
                expected,
                actual: accept.to_string(),
            });
        }

        match response.header("sec-websocket-protocol") {
            None => Ok(None),
            Some(selected) => {
                if self.protocols.iter().any(|p| p == selected) {
                    Ok(Some(selected.to_string()))
                } else {
                    Err(HandshakeError::ProtocolMismatch {
                        requested: self.protocols.clone(),
                        offered: selected.to_string(),
                    })
                }
            }
        }
    }
}

/// Server-side WebSocket handshake configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerHandshake {
    /// Supported subprotocols.
    supported_protocols: Vec<String>,
}

impl ServerHandshake {
    /// Create a new server handshake configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a supported subprotocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.supported_protocols.push(protocol.into());
        self
    }

    /// Validate a client request and generate the accept response.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The method is not GET or the HTTP version is below 1.1
    /// - Required headers are missing or malformed
    /// - The WebSocket version is not 13
    /// - Sec-WebSocket-Key is not base64 for exactly 16 bytes
    pub fn accept(&self, request: &HttpRequest) -> Result<AcceptResponse, HandshakeError> {
        if request.method != "GET" {
            return Err(HandshakeError::InvalidRequest(format!(
                "method must be GET, got '{}'",
                request.method
            )));
        }

        if !request.version_at_least_1_1() {
            return Err(HandshakeError::InvalidRequest(format!(
                "HTTP version must be at least 1.1, got '{}'",
                request.version
            )));
        }

        let upgrade = request
            .header("upgrade")
            .ok_or(HandshakeError::MissingHeader("Upgrade"))?;
        if !upgrade.eq_ignore_ascii_case("websocket") {
            return Err(HandshakeError::InvalidRequest(format!(
                "Upgrade header must be 'websocket', got '{upgrade}'"
            )));
        }

        let connection = request
            .header("connection")
            .ok_or(HandshakeError::MissingHeader("Connection"))?;
        if !connection_has_upgrade(connection) {
            return Err(HandshakeError::InvalidRequest(format!(
                "Connection header must contain 'upgrade', got '{connection}'"
            )));
        }

        let version = request
            .header("sec-websocket-version")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Version"))?;
        if version != "13" {
            return Err(HandshakeError::UnsupportedVersion(version.to_string()));
        }

        let client_key = request
            .header("sec-websocket-key")
            .ok_or(HandshakeError::MissingHeader("Sec-WebSocket-Key"))?;

        // The key must be base64 for exactly 16 bytes.
        match base64::engine::general_purpose::STANDARD.decode(client_key) {
            Ok(decoded) if decoded.len() == 16 => {}
            _ => return Err(HandshakeError::InvalidKey),
        }

        let accept_key = compute_accept_key(client_key);

        // First supported protocol in the client's preference order wins.
        let selected_protocol = request.header("sec-websocket-protocol").and_then(|offered| {
            offered
                .split(',')
                .map(str::trim)
                .find(|candidate| self.supported_protocols.iter().any(|p| p == candidate))
                .map(str::to_string)
        });

        Ok(AcceptResponse {
            accept_key,
            protocol: selected_protocol,
        })
    }

    /// Generate a rejection response with the given HTTP status.
    ///
    /// The reason phrase doubles as a short plain-text body.
    #[must_use]
    pub fn reject(status: u16, reason: &str) -> Vec<u8> {
        format!(
            "HTTP/1.1 {status} {reason}\r\n\
             Connection: close\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {reason}",
            reason.len(),
        )
        .into_bytes()
    }

    /// Generate the `426 Upgrade Required` response sent for version
    /// mismatches, advertising the version this server speaks.
    #[must_use]
    pub fn reject_version() -> Vec<u8> {
        let reason = "Upgrade Required";
        format!(
            "HTTP/1.1 426 {reason}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Connection: close\r\n\
             Content-Type: text/plain\r\n\
             Content-Length: {}\r\n\
             \r\n\
             {reason}",
            reason.len(),
        )
        .into_bytes()
    }
}

/// Result of accepting a WebSocket upgrade.
#[derive(Debug, Clone)]
pub struct AcceptResponse {
    /// Computed Sec-WebSocket-Accept value.
    pub accept_key: String,
    /// Negotiated subprotocol (if any).
    pub protocol: Option<String>,
}

impl AcceptResponse {
    /// Generate the HTTP 101 response as bytes.
    #[must_use]
    pub fn response_bytes(&self) -> Vec<u8> {
        let mut response = String::from(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n",
        );

        response.push_str("Sec-WebSocket-Accept: ");
        response.push_str(&self.accept_key);
        response.push_str("\r\n");

        if let Some(ref protocol) = self.protocol {
            response.push_str("Sec-WebSocket-Protocol: ");
            response.push_str(protocol);
            response.push_str("\r\n");
        }

        response.push_str("\r\n");
        response.into_bytes()
    }
}

/// Minimal HTTP request representation for the handshake.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method (must be GET for WebSocket).
    pub method: String,
    /// Request path.
    pub path: String,
    /// HTTP version string, e.g. "HTTP/1.1".
    pub version: String,
    /// HTTP headers (lowercase keys).
    headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Parse an HTTP request head from bytes.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeError::InvalidRequest` if parsing fails.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| HandshakeError::InvalidRequest("invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("empty request".into()))?;

        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("missing method".into()))?
            .to_string();
        let path = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("missing path".into()))?
            .to_string();
        let version = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("missing HTTP version".into()))?
            .to_string();

        Ok(Self {
            method,
            path,
            version,
            headers: parse_headers(lines),
        })
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn version_at_least_1_1(&self) -> bool {
        match self.version.strip_prefix("HTTP/") {
            Some(v) => match v.split_once('.') {
                Some((major, minor)) => {
                    let major: u32 = major.parse().unwrap_or(0);
                    let minor: u32 = minor.parse().unwrap_or(0);
                    major > 1 || (major == 1 && minor >= 1)
                }
                None => v.parse::<u32>().map(|major| major > 1).unwrap_or(false),
            },
            None => false,
        }
    }
}

/// Minimal HTTP response representation for the handshake.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase.
    pub reason: String,
    /// HTTP headers (lowercase keys).
    headers: HashMap<String, String>,
}

impl HttpResponse {
    /// Parse an HTTP response head from bytes.
    ///
    /// # Errors
    ///
    /// Returns `HandshakeError::InvalidRequest` if parsing fails.
    pub fn parse(data: &[u8]) -> Result<Self, HandshakeError> {
        let text = std::str::from_utf8(data)
            .map_err(|_| HandshakeError::InvalidRequest("invalid UTF-8".into()))?;

        let mut lines = text.lines();

        let status_line = lines
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("empty response".into()))?;

        let mut parts = status_line.splitn(3, ' ');
        let _version = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("missing HTTP version".into()))?;
        let status: u16 = parts
            .next()
            .ok_or_else(|| HandshakeError::InvalidRequest("missing status code".into()))?
            .parse()
            .map_err(|_| HandshakeError::InvalidRequest("invalid status code".into()))?;
        let reason = parts.next().unwrap_or("").to_string();

        Ok(Self {
            status,
            reason,
            headers: parse_headers(lines),
        })
    }

    /// Get a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    headers
}
