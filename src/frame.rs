//! WebSocket frame codec according to RFC 6455.
//!
//! Implements the WebSocket wire format for framing messages:
//! - Binary frame encoding/decoding
//! - Masking (client-to-server)
//! - Fragmentation support
//! - Control frame validation
//!
//! # Frame Format (RFC 6455 Section 5.2)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
//! |N|V|V|V|       |S|             |   (if payload len==126/127)   |
//! | |1|2|3|       |K|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Extended payload length continued, if payload len == 127  |
//! + - - - - - - - - - - - - - - - +-------------------------------+
//! |                               |Masking-key, if MASK set to 1  |
//! +-------------------------------+-------------------------------+
//! | Masking-key (continued)       |          Payload Data         |
//! +-------------------------------- - - - - - - - - - - - - - - - +
//! :                     Payload Data continued ...                :
//! + - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - +
//! |                     Payload Data (continued)                  |
//! +---------------------------------------------------------------+
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// WebSocket frame opcode (4 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Continuation frame (fragmented message).
    Continuation = 0x0,
    /// Text data frame.
    Text = 0x1,
    /// Binary data frame.
    Binary = 0x2,
    // 0x3-0x7 reserved for non-control frames
    /// Connection close control frame.
    Close = 0x8,
    /// Ping control frame.
    Ping = 0x9,
    /// Pong control frame.
    Pong = 0xA,
    // 0xB-0xF reserved for control frames
}

impl Opcode {
    /// Returns true if this is a control frame (Close, Ping, Pong).
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }

    /// Returns true if this is a data frame (Continuation, Text, Binary).
    #[must_use]
    pub const fn is_data(self) -> bool {
        matches!(self, Self::Continuation | Self::Text | Self::Binary)
    }

    /// Try to parse an opcode from a byte value.
    ///
    /// # Errors
    ///
    /// Returns `WsError::InvalidOpcode` for reserved values (0x3-0x7, 0xB-0xF).
    pub fn from_u8(value: u8) -> Result<Self, WsError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            _ => Err(WsError::InvalidOpcode(value)),
        }
    }
}

/// WebSocket frame.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)] // RFC 6455 exposes these as independent header bits.
pub struct Frame {
    /// Final fragment flag (FIN bit).
    pub fin: bool,
    /// Reserved bit 1 (must be 0, no extensions are negotiated).
    pub rsv1: bool,
    /// Reserved bit 2 (must be 0, no extensions are negotiated).
    pub rsv2: bool,
    /// Reserved bit 3 (must be 0, no extensions are negotiated).
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Mask flag (client-to-server frames must be masked).
    pub masked: bool,
    /// Masking key (4 bytes, only present on decoded masked frames).
    pub mask_key: Option<[u8; 4]>,
    /// Payload data.
    pub payload: Bytes,
}

impl Frame {
    fn data_frame(opcode: Opcode, fin: bool, payload: Bytes) -> Self {
        Self {
            fin,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            mask_key: None,
            payload,
        }
    }

    /// Create an unfragmented text frame with the given payload.
    #[must_use]
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self::data_frame(Opcode::Text, true, payload.into())
    }

    /// Create an unfragmented binary frame with the given payload.
    #[must_use]
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self::data_frame(Opcode::Binary, true, payload.into())
    }

    /// Create one fragment of a fragmented message.
    ///
    /// The first fragment carries the data opcode, subsequent fragments
    /// `Opcode::Continuation`; only the last fragment sets `fin`.
    #[must_use]
    pub fn fragment(opcode: Opcode, fin: bool, payload: impl Into<Bytes>) -> Self {
        Self::data_frame(opcode, fin, payload.into())
    }

    /// Create a ping frame with optional payload.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self::data_frame(Opcode::Ping, true, payload.into())
    }

    /// Create a pong frame with optional payload.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self::data_frame(Opcode::Pong, true, payload.into())
    }

    /// Create a close frame with optional status code and reason.
    #[must_use]
    pub fn close(code: Option<u16>, reason: Option<&str>) -> Self {
        let payload = match (code, reason) {
            (Some(c), Some(r)) => {
                let mut buf = BytesMut::with_capacity(2 + r.len());
                buf.put_u16(c);
                buf.put_slice(r.as_bytes());
                buf.freeze()
            }
            (Some(c), None) => {
                let mut buf = BytesMut::with_capacity(2);
                buf.put_u16(c);
                buf.freeze()
            }
            _ => Bytes::new(),
        };

        Self::data_frame(Opcode::Close, true, payload)
    }
}

/// WebSocket protocol and codec errors.
#[derive(Debug)]
pub enum WsError {
    /// I/O error.
    Io(io::Error),
    /// Invalid opcode value.
    InvalidOpcode(u8),
    /// Protocol violation (e.g. unexpected continuation frame).
    ProtocolViolation(&'static str),
    /// Reserved bits set without extension support.
    ReservedBitsSet,
    /// Frame payload exceeds the maximum allowed size.
    PayloadTooLarge {
        /// Actual payload size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Assembled message exceeds the maximum allowed size.
    MessageTooLarge {
        /// Accumulated message size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
    /// Control frame payload exceeds 125 bytes.
    ControlFrameTooLarge(usize),
    /// Control frame is fragmented (FIN not set).
    FragmentedControlFrame,
    /// Client frame is not masked (protocol violation).
    UnmaskedClientFrame,
    /// Server frame is masked (protocol violation).
    MaskedServerFrame,
    /// Invalid UTF-8 in a text message or close reason.
    InvalidUtf8,
    /// Invalid close frame payload (single-byte payload).
    InvalidClosePayload,
    /// Close code outside the ranges permitted on the wire.
    InvalidCloseCode(u16),
    /// Operation requires an open connection.
    NotOpen,
}

impl WsError {
    /// The close code that reports this error to the peer.
    ///
    /// `Io` maps to `Abnormal` (1006), which is never written to the wire;
    /// it only labels the local close reason.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::Io(_) => CloseCode::Abnormal,
            Self::InvalidUtf8 => CloseCode::InvalidPayload,
            Self::PayloadTooLarge { .. } | Self::MessageTooLarge { .. } => CloseCode::MessageTooBig,
            _ => CloseCode::ProtocolError,
        }
    }
}

impl std::fmt::Display for WsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidOpcode(op) => write!(f, "invalid opcode: 0x{op:X}"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::ReservedBitsSet => write!(f, "reserved bits set without extension"),
            Self::PayloadTooLarge { size, max } => {
                write!(f, "frame payload too large: {size} bytes (max: {max})")
            }
            Self::MessageTooLarge { size, max } => {
                write!(f, "message too large: {size} bytes (max: {max})")
            }
            Self::ControlFrameTooLarge(size) => {
                write!(f, "control frame payload too large: {size} bytes (max: 125)")
            }
            Self::FragmentedControlFrame => write!(f, "control frame cannot be fragmented"),
            Self::UnmaskedClientFrame => write!(f, "client frame must be masked"),
            Self::MaskedServerFrame => write!(f, "server frame must not be masked"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8 payload"),
            Self::InvalidClosePayload => write!(f, "invalid close frame payload"),
            Self::InvalidCloseCode(code) => write!(f, "invalid close code: {code}"),
            Self::NotOpen => write!(f, "connection is not open"),
        }
    }
}

impl std::error::Error for WsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WsError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Role in the WebSocket connection (affects masking requirements).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Client role: must mask frames sent to the server.
    Client,
    /// Server role: must not mask frames sent to the client.
    Server,
}

/// Decode state machine for the frame codec.
///
/// All header fields are `Copy`, so each state carries what it has parsed so
/// far and the machine advances by plain assignment.
#[derive(Debug, Clone, Copy)]
enum DecodeState {
    /// Waiting for the first 2 header bytes.
    Header,
    /// Reading a 2- or 8-byte extended payload length.
    ExtendedLength { header: FrameHeader, bytes_needed: usize },
    /// Reading the 4-byte mask key.
    MaskKey { header: FrameHeader, payload_len: u64 },
    /// Reading the payload.
    Payload {
        header: FrameHeader,
        mask_key: Option<[u8; 4]>,
        payload_len: u64,
    },
}

/// The fixed part of a frame header, parsed from the first two bytes.
#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    fin: bool,
    opcode: Opcode,
    masked: bool,
}

/// WebSocket frame codec.
///
/// Implements encoding and decoding of WebSocket frames according to
/// RFC 6455, with the strictness the Autobahn suite expects: reserved bits
/// and opcodes rejected, control frames bounded, masking direction enforced
/// by role, and extended payload lengths required to be minimal.
#[derive(Debug)]
pub struct FrameCodec {
    /// Maximum frame payload size.
    max_frame_size: usize,
    /// Role (client or server) affects masking requirements.
    role: Role,
    /// Current decode state.
    state: DecodeState,
}

impl FrameCodec {
    /// Default maximum frame payload size (1 MiB).
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

    /// Creates a new frame codec for the given role.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self {
            max_frame_size: Self::DEFAULT_MAX_FRAME_SIZE,
            role,
            state: DecodeState::Header,
        }
    }

    /// Creates a client-role frame codec.
    #[must_use]
    pub fn client() -> Self {
        Self::new(Role::Client)
    }

    /// Creates a server-role frame codec.
    #[must_use]
    pub fn server() -> Self {
        Self::new(Role::Server)
    }

    /// Sets the maximum frame payload size.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    fn check_frame_size(&self, payload_len: u64) -> Result<(), WsError> {
        if payload_len > self.max_frame_size as u64 {
            return Err(WsError::PayloadTooLarge {
                size: payload_len,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    if src.len() < 2 {
                        return Ok(None);
                    }

                    let first_byte = src[0];
                    let second_byte = src[1];

                    let fin = (first_byte & 0x80) != 0;
                    let rsv = first_byte & 0x70;
                    let opcode_raw = first_byte & 0x0F;
                    let masked = (second_byte & 0x80) != 0;
                    let payload_len_7 = second_byte & 0x7F;

                    if rsv != 0 {
                        return Err(WsError::ReservedBitsSet);
                    }

                    let opcode = Opcode::from_u8(opcode_raw)?;

                    // Masking rules (RFC 6455):
                    // - Client->Server frames MUST be masked
                    // - Server->Client frames MUST NOT be masked
                    match self.role {
                        Role::Server if !masked => return Err(WsError::UnmaskedClientFrame),
                        Role::Client if masked => return Err(WsError::MaskedServerFrame),
                        _ => {}
                    }

                    // Control frames must not be fragmented and carry at most
                    // 125 payload bytes; 126/127 length markers are themselves
                    // over the limit.
                    if opcode.is_control() {
                        if !fin {
                            return Err(WsError::FragmentedControlFrame);
                        }
                        if payload_len_7 > 125 {
                            return Err(WsError::ControlFrameTooLarge(payload_len_7 as usize));
                        }
                    }

                    let _ = src.split_to(2);
                    let header = FrameHeader { fin, opcode, masked };

                    match payload_len_7 {
                        0..=125 => {
                            let payload_len = u64::from(payload_len_7);
                            self.check_frame_size(payload_len)?;
                            self.state = if masked {
                                DecodeState::MaskKey { header, payload_len }
                            } else {
                                DecodeState::Payload {
                                    header,
                                    mask_key: None,
                                    payload_len,
                                }
                            };
                        }
                        126 => {
                            self.state = DecodeState::ExtendedLength {
                                header,
                                bytes_needed: 2,
                            };
                        }
                        127 => {
                            self.state = DecodeState::ExtendedLength {
                                header,
                                bytes_needed: 8,
                            };
                        }
                        _ => unreachable!(),
                    }
                }

                DecodeState::ExtendedLength {
                    header,
                    bytes_needed,
                } => {
                    if src.len() < bytes_needed {
                        return Ok(None);
                    }

                    let payload_len = if bytes_needed == 2 {
                        let bytes = src.split_to(2);
                        let len = u64::from(u16::from_be_bytes([bytes[0], bytes[1]]));
                        if len < 126 {
                            return Err(WsError::ProtocolViolation(
                                "16-bit payload length must be at least 126",
                            ));
                        }
                        len
                    } else {
                        let bytes = src.split_to(8);
                        let len = u64::from_be_bytes([
                            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6],
                            bytes[7],
                        ]);
                        if len & (1 << 63) != 0 {
                            return Err(WsError::ProtocolViolation(
                                "64-bit payload length has the top bit set",
                            ));
                        }
                        if len < 65536 {
                            return Err(WsError::ProtocolViolation(
                                "64-bit payload length must be at least 65536",
                            ));
                        }
                        len
                    };

                    self.check_frame_size(payload_len)?;

                    self.state = if header.masked {
                        DecodeState::MaskKey { header, payload_len }
                    } else {
                        DecodeState::Payload {
                            header,
                            mask_key: None,
                            payload_len,
                        }
                    };
                }

                DecodeState::MaskKey {
                    header,
                    payload_len,
                } => {
                    if src.len() < 4 {
                        return Ok(None);
                    }

                    let mask_bytes = src.split_to(4);
                    let mut mask_key = [0u8; 4];
                    mask_key.copy_from_slice(&mask_bytes);

                    self.state = DecodeState::Payload {
                        header,
                        mask_key: Some(mask_key),
                        payload_len,
                    };
                }

                DecodeState::Payload {
                    header,
                    mask_key,
                    payload_len,
                } => {
                    let payload_len = payload_len as usize;
                    if src.len() < payload_len {
                        src.reserve(payload_len - src.len());
                        return Ok(None);
                    }

                    let mut payload = src.split_to(payload_len);
                    if let Some(key) = mask_key {
                        apply_mask(&mut payload, key);
                    }

                    self.state = DecodeState::Header;

                    return Ok(Some(Frame {
                        fin: header.fin,
                        rsv1: false,
                        rsv2: false,
                        rsv3: false,
                        opcode: header.opcode,
                        masked: mask_key.is_some(),
                        mask_key,
                        payload: payload.freeze(),
                    }));
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload_len = frame.payload.len();

        if frame.opcode.is_control() {
            if !frame.fin {
                return Err(WsError::FragmentedControlFrame);
            }
            if payload_len > 125 {
                return Err(WsError::ControlFrameTooLarge(payload_len));
            }
        }

        let should_mask = self.role == Role::Client;

        let mut first_byte = frame.opcode as u8;
        if frame.fin {
            first_byte |= 0x80;
        }
        if frame.rsv1 {
            first_byte |= 0x40;
        }
        if frame.rsv2 {
            first_byte |= 0x20;
        }
        if frame.rsv3 {
            first_byte |= 0x10;
        }

        let mask_bit = if should_mask { 0x80 } else { 0 };

        let header_size = 2
            + if payload_len > 65535 {
                8
            } else if payload_len > 125 {
                2
            } else {
                0
            }
            + if should_mask { 4 } else { 0 };

        dst.reserve(header_size + payload_len);
        dst.put_u8(first_byte);

        if payload_len <= 125 {
            dst.put_u8(mask_bit | (payload_len as u8));
        } else if payload_len <= 65535 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(payload_len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(payload_len as u64);
        }

        if should_mask {
            let mask_key = generate_mask_key();
            dst.put_slice(&mask_key);

            let mut masked_payload = BytesMut::from(frame.payload.as_ref());
            apply_mask(&mut masked_payload, mask_key);
            dst.put_slice(&masked_payload);
        } else {
            dst.put_slice(&frame.payload);
        }

        Ok(())
    }
}

/// Apply XOR masking to payload data.
///
/// This is used for both masking (encoding) and unmasking (decoding).
/// The mask is applied in-place.
pub fn apply_mask(payload: &mut [u8], mask_key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Generate a mask key for client-to-server frames.
///
/// RFC 6455 §5.3 requires masking keys to be derived from a strong source of
/// entropy to prevent cross-protocol attacks via intermediary cache poisoning.
fn generate_mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    getrandom::fill(&mut key).expect("OS RNG unavailable");
    key
}

/// Close codes defined by RFC 6455.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum CloseCode {
    /// Normal closure (1000).
    Normal = 1000,
    /// Going away (1001).
    GoingAway = 1001,
    /// Protocol error (1002).
    ProtocolError = 1002,
    /// Unsupported data type (1003).
    Unsupported = 1003,
    /// No status received (1005) - never appears on the wire.
    NoStatusReceived = 1005,
    /// Abnormal closure (1006) - never appears on the wire.
    Abnormal = 1006,
    /// Invalid payload data (1007).
    InvalidPayload = 1007,
    /// Policy violation (1008).
    PolicyViolation = 1008,
    /// Message too big (1009).
    MessageTooBig = 1009,
    /// Mandatory extension missing (1010).
    MandatoryExtension = 1010,
    /// Internal server error (1011).
    InternalError = 1011,
    /// TLS handshake failure (1015) - never appears on the wire.
    TlsHandshake = 1015,
}

impl CloseCode {
    /// Returns true if this code can be sent in a close frame.
    #[must_use]
    pub const fn is_sendable(self) -> bool {
        !matches!(
            self,
            Self::NoStatusReceived | Self::Abnormal | Self::TlsHandshake
        )
    }

    /// Check whether a raw code value is permitted on the wire.
    ///
    /// Valid ranges per RFC 6455: 1000-1003 and 1007-1011 (standard codes),
    /// 3000-3999 (registered), 4000-4999 (private use). Everything else is
    /// rejected both when received from the peer and when supplied to
    /// [`close`](crate::WebSocket::close).
    #[must_use]
    pub fn is_valid_code(code: u16) -> bool {
        matches!(code, 1000..=1003 | 1007..=1011 | 3000..=4999)
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code as Self
    }
}
