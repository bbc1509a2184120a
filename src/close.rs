//! WebSocket close handshake protocol (RFC 6455 Section 7).
//!
//! The close handshake ensures clean connection termination with proper
//! status code propagation:
//!
//! 1. Initiator sends a Close frame with optional status code and reason
//! 2. Receiver echoes a Close frame back
//! 3. Both sides enter the closed state
//!
//! The initiator bounds the wait for the peer's echo with a timeout and
//! closes the transport either way.

use crate::frame::{CloseCode, Frame, Opcode, WsError};

/// Parsed close frame payload: a status code and an optional reason.
///
/// An empty close payload is valid on the wire and is represented locally
/// as code 1005 (no status received), which is never re-serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code.
    pub code: u16,
    /// Close reason text (possibly empty).
    pub reason: String,
}

impl CloseReason {
    /// Create a new close reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Create a close reason for normal closure (1000).
    #[must_use]
    pub fn normal() -> Self {
        Self::new(CloseCode::Normal.into(), "")
    }

    /// Create a close reason for going away (1001).
    #[must_use]
    pub fn going_away() -> Self {
        Self::new(CloseCode::GoingAway.into(), "")
    }

    /// Create a close reason for abnormal termination (1006, local only).
    #[must_use]
    pub fn abnormal() -> Self {
        Self::new(CloseCode::Abnormal.into(), "")
    }

    /// Create a close reason from a named close code.
    #[must_use]
    pub fn from_code(code: CloseCode) -> Self {
        Self::new(code.into(), "")
    }

    /// Parse a close frame payload.
    ///
    /// # Payload Format
    ///
    /// - Empty: no status from the peer, recorded locally as 1005
    /// - 2 bytes: big-endian status code
    /// - 2+ bytes: status code followed by UTF-8 reason text
    ///
    /// # Errors
    ///
    /// - `WsError::InvalidClosePayload` for a 1-byte payload
    /// - `WsError::InvalidCloseCode` for a code outside the permitted ranges
    /// - `WsError::InvalidUtf8` when the reason text is not UTF-8
    pub fn parse(payload: &[u8]) -> Result<Self, WsError> {
        match payload.len() {
            0 => Ok(Self::new(CloseCode::NoStatusReceived.into(), "")),
            1 => Err(WsError::InvalidClosePayload),
            _ => {
                let code = u16::from_be_bytes([payload[0], payload[1]]);
                if !CloseCode::is_valid_code(code) {
                    return Err(WsError::InvalidCloseCode(code));
                }

                let reason = std::str::from_utf8(&payload[2..])
                    .map_err(|_| WsError::InvalidUtf8)?
                    .to_string();

                Ok(Self { code, reason })
            }
        }
    }

    /// Convert to a close frame.
    ///
    /// A 1005 reason (no status) becomes an empty close payload; 1005, 1006
    /// and 1015 otherwise never reach the wire.
    #[must_use]
    pub fn to_frame(&self) -> Frame {
        if self.code == u16::from(CloseCode::NoStatusReceived) {
            return Frame::close(None, None);
        }
        let reason = (!self.reason.is_empty()).then_some(self.reason.as_str());
        Frame::close(Some(self.code), reason)
    }

    /// Check if this represents a normal closure.
    #[must_use]
    pub fn is_normal(&self) -> bool {
        self.code == u16::from(CloseCode::Normal)
    }
}

/// State of the close handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseState {
    /// Connection is open (normal operation).
    #[default]
    Open,
    /// We sent a close frame, waiting for the peer's close frame.
    CloseSent,
    /// We received the peer's close frame and owe it an echo.
    CloseReceived,
    /// Close handshake complete, connection can be terminated.
    Closed,
}

impl CloseState {
    /// Check if the connection is still open for data.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Check if the close handshake is complete.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Check if we're in the process of closing.
    #[must_use]
    pub const fn is_closing(self) -> bool {
        matches!(self, Self::CloseSent | Self::CloseReceived)
    }
}

/// Close handshake state machine.
///
/// Tracks which side initiated, which close frames have been exchanged,
/// and the effective close reason to report to the caller.
#[derive(Debug, Default)]
pub struct CloseHandshake {
    state: CloseState,
    /// The reason we sent (or would have sent).
    local: Option<CloseReason>,
    /// The reason the peer sent.
    peer: Option<CloseReason>,
}

impl CloseHandshake {
    /// Create a new close handshake tracker in the open state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the current state.
    #[must_use]
    pub const fn state(&self) -> CloseState {
        self.state
    }

    /// Check if the connection is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// Check if the close handshake is complete.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// The close reason the peer sent, if any.
    #[must_use]
    pub fn peer_reason(&self) -> Option<&CloseReason> {
        self.peer.as_ref()
    }

    /// The close reason we recorded locally, if any.
    #[must_use]
    pub fn local_reason(&self) -> Option<&CloseReason> {
        self.local.as_ref()
    }

    /// The effective close reason: the peer's when they sent one,
    /// otherwise whatever we recorded locally.
    #[must_use]
    pub fn reason(&self) -> Option<&CloseReason> {
        self.peer.as_ref().or(self.local.as_ref())
    }

    /// Initiate a close handshake.
    ///
    /// Returns the close frame to send, or `None` if one was already sent.
    ///
    /// # State Transitions
    ///
    /// - `Open` → `CloseSent`: returns our close frame
    /// - `CloseReceived` → `Closed`: returns the echo frame
    /// - `CloseSent` | `Closed`: returns `None`
    pub fn initiate(&mut self, reason: CloseReason) -> Option<Frame> {
        match self.state {
            CloseState::Open => {
                self.state = CloseState::CloseSent;
                let frame = reason.to_frame();
                self.local = Some(reason);
                Some(frame)
            }
            CloseState::CloseReceived => {
                self.state = CloseState::Closed;
                let frame = reason.to_frame();
                self.local = Some(reason);
                Some(frame)
            }
            CloseState::CloseSent | CloseState::Closed => None,
        }
    }

    /// Handle a received close frame.
    ///
    /// Returns the echo frame to send, or `None` when no response is owed.
    /// After the returned echo has been written and flushed, the caller
    /// must call [`echo_sent`](Self::echo_sent) to complete the handshake.
    ///
    /// # State Transitions
    ///
    /// - `Open` → `CloseReceived`: stores the peer reason, returns the echo
    /// - `CloseSent` → `Closed`: stores the peer reason, returns `None`
    /// - `CloseReceived` | `Closed`: returns `None` (duplicate)
    ///
    /// # Errors
    ///
    /// Propagates [`CloseReason::parse`] failures for malformed payloads;
    /// the caller terminates the connection with the matching close code.
    pub fn receive(&mut self, frame: &Frame) -> Result<Option<Frame>, WsError> {
        debug_assert_eq!(frame.opcode, Opcode::Close);

        let reason = CloseReason::parse(&frame.payload)?;

        match self.state {
            CloseState::Open => {
                self.state = CloseState::CloseReceived;
                let echo = reason.to_frame();
                self.peer = Some(reason);
                Ok(Some(echo))
            }
            CloseState::CloseSent => {
                self.state = CloseState::Closed;
                self.peer = Some(reason);
                Ok(None)
            }
            CloseState::CloseReceived | CloseState::Closed => Ok(None),
        }
    }

    /// Complete the handshake after the echo returned by
    /// [`receive`](Self::receive) has been written and flushed.
    pub fn echo_sent(&mut self) {
        if self.state == CloseState::CloseReceived {
            self.state = CloseState::Closed;
            if self.local.is_none() {
                self.local = self.peer.clone();
            }
        }
    }

    /// Force transition to the closed state.
    ///
    /// Used when the connection terminates without a proper handshake
    /// (timeout, protocol error, transport failure).
    pub fn force_close(&mut self, reason: CloseReason) {
        self.state = CloseState::Closed;
        if self.local.is_none() {
            self.local = Some(reason);
        }
    }
}
