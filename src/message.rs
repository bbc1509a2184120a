//! Application messages and reassembly of fragmented frames.
//!
//! A message is one data frame, or an initial Text/Binary frame followed by
//! continuation frames and terminated by a frame with FIN set. Control
//! frames are routed by the connection before frames reach the assembler,
//! so interleaved Ping/Pong/Close never disturb an in-progress message.

use crate::frame::{Frame, Opcode, WsError};
use crate::utf8::Utf8Validator;
use bytes::{Bytes, BytesMut};

/// A complete WebSocket application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Text message (valid UTF-8).
    Text(String),
    /// Binary message.
    Binary(Bytes),
}

impl Message {
    /// Create a text message.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Create a binary message.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self {
        Self::Binary(data.into())
    }

    /// Returns true for text messages.
    #[must_use]
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Text(_))
    }

    /// Returns true for binary messages.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(s) => s.len(),
            Self::Binary(b) => b.len(),
        }
    }

    /// Returns true when the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The data opcode this message is framed with.
    #[must_use]
    pub(crate) fn opcode(&self) -> Opcode {
        match self {
            Self::Text(_) => Opcode::Text,
            Self::Binary(_) => Opcode::Binary,
        }
    }

    /// Consume the message, yielding its payload bytes.
    #[must_use]
    pub fn into_payload(self) -> Bytes {
        match self {
            Self::Text(s) => Bytes::from(s.into_bytes()),
            Self::Binary(b) => b,
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

/// Reassembles data frames into complete messages.
///
/// Enforces the RFC 6455 fragmentation rules: a new Text/Binary frame while
/// a message is in progress and a Continuation frame with no message in
/// progress are both protocol errors, and the accumulated size is capped on
/// every push so a hostile peer cannot grow the buffer unboundedly before
/// the final frame.
#[derive(Debug)]
pub struct MessageAssembler {
    /// Data opcode of the in-progress message, if any.
    kind: Option<Opcode>,
    /// Accumulated fragment payloads.
    buf: BytesMut,
    /// Incremental validator for text messages.
    utf8: Utf8Validator,
    /// Maximum assembled message size.
    max_message_size: usize,
}

impl MessageAssembler {
    /// Create an assembler with the given message size cap.
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self {
            kind: None,
            buf: BytesMut::new(),
            utf8: Utf8Validator::new(),
            max_message_size,
        }
    }

    /// Returns true while a fragmented message is in progress.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.kind.is_some()
    }

    /// Feed one data frame. Returns the completed message, if this frame
    /// finished one.
    ///
    /// # Errors
    ///
    /// - `WsError::ProtocolViolation` on fragmentation-order violations
    /// - `WsError::MessageTooLarge` when the accumulated size passes the cap
    /// - `WsError::InvalidUtf8` on invalid text payload bytes
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, WsError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.kind.is_some() {
                    return Err(WsError::ProtocolViolation(
                        "data frame while a fragmented message is in progress",
                    ));
                }

                self.check_size(frame.payload.len())?;

                if frame.fin {
                    // Unfragmented fast path.
                    if frame.opcode == Opcode::Text {
                        let text = String::from_utf8(frame.payload.to_vec())
                            .map_err(|_| WsError::InvalidUtf8)?;
                        return Ok(Some(Message::Text(text)));
                    }
                    return Ok(Some(Message::Binary(frame.payload)));
                }

                self.kind = Some(frame.opcode);
                self.buf.clear();
                self.utf8.reset();
                self.buf.extend_from_slice(&frame.payload);
                if frame.opcode == Opcode::Text {
                    self.utf8.advance(&self.buf)?;
                }
                Ok(None)
            }

            Opcode::Continuation => {
                let kind = self.kind.ok_or(WsError::ProtocolViolation(
                    "continuation frame with no message in progress",
                ))?;

                self.check_size(self.buf.len() + frame.payload.len())?;
                self.buf.extend_from_slice(&frame.payload);

                if frame.fin {
                    if kind == Opcode::Text {
                        self.utf8.finish(&self.buf)?;
                    }
                    self.kind = None;
                    let data = self.buf.split();

                    if kind == Opcode::Text {
                        let text = String::from_utf8(data.to_vec())
                            .map_err(|_| WsError::InvalidUtf8)?;
                        return Ok(Some(Message::Text(text)));
                    }
                    return Ok(Some(Message::Binary(data.freeze())));
                }

                if kind == Opcode::Text {
                    self.utf8.advance(&self.buf)?;
                }
                Ok(None)
            }

            // The connection handles control frames before the assembler.
            Opcode::Close | Opcode::Ping | Opcode::Pong => Err(WsError::ProtocolViolation(
                "control frame routed to the message assembler",
            )),
        }
    }

    fn check_size(&self, size: usize) -> Result<(), WsError> {
        if size > self.max_message_size {
            return Err(WsError::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 1024;

    #[test]
    fn unfragmented_text() {
        let mut assembler = MessageAssembler::new(MAX);
        let msg = assembler.push(Frame::text("Hello")).unwrap().unwrap();
        assert_eq!(msg, Message::text("Hello"));
    }

    #[test]
    fn unfragmented_binary() {
        let mut assembler = MessageAssembler::new(MAX);
        let msg = assembler
            .push(Frame::binary(vec![1, 2, 3]))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::binary(vec![1, 2, 3]));
    }

    #[test]
    fn empty_message_is_legal() {
        let mut assembler = MessageAssembler::new(MAX);
        let msg = assembler.push(Frame::text("")).unwrap().unwrap();
        assert!(msg.is_empty());
    }

    #[test]
    fn three_fragment_binary() {
        let mut assembler = MessageAssembler::new(MAX);
        assert!(assembler
            .push(Frame::fragment(Opcode::Binary, false, vec![1u8, 2]))
            .unwrap()
            .is_none());
        assert!(assembler.in_progress());
        assert!(assembler
            .push(Frame::fragment(Opcode::Continuation, false, vec![3u8]))
            .unwrap()
            .is_none());
        let msg = assembler
            .push(Frame::fragment(Opcode::Continuation, true, vec![4u8, 5]))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::binary(vec![1, 2, 3, 4, 5]));
        assert!(!assembler.in_progress());
    }

    #[test]
    fn text_split_inside_code_point() {
        // "é" (C3 A9) split across two fragments.
        let mut assembler = MessageAssembler::new(MAX);
        assert!(assembler
            .push(Frame::fragment(Opcode::Text, false, vec![0xC3u8]))
            .unwrap()
            .is_none());
        let msg = assembler
            .push(Frame::fragment(Opcode::Continuation, true, vec![0xA9u8]))
            .unwrap()
            .unwrap();
        assert_eq!(msg, Message::text("é"));
    }

    #[test]
    fn text_invalid_continuation_byte_fails_on_second_frame() {
        let mut assembler = MessageAssembler::new(MAX);
        assert!(assembler
            .push(Frame::fragment(Opcode::Text, false, vec![0xC3u8]))
            .unwrap()
            .is_none());
        let err = assembler
            .push(Frame::fragment(Opcode::Continuation, true, vec![0x28u8]))
            .unwrap_err();
        assert!(matches!(err, WsError::InvalidUtf8));
    }

    #[test]
    fn text_truncated_at_fin_fails() {
        let mut assembler = MessageAssembler::new(MAX);
        let err = assembler
            .push(Frame::fragment(Opcode::Text, true, vec![0xC3u8]))
            .unwrap_err();
        assert!(matches!(err, WsError::InvalidUtf8));
    }

    #[test]
    fn invalid_utf8_fails_before_fin() {
        // The invalid byte arrives in a non-final fragment and must be
        // rejected right away, not at message completion.
        let mut assembler = MessageAssembler::new(MAX);
        let err = assembler
            .push(Frame::fragment(Opcode::Text, false, vec![0xFFu8]))
            .unwrap_err();
        assert!(matches!(err, WsError::InvalidUtf8));
    }

    #[test]
    fn new_data_frame_during_fragmented_message_is_rejected() {
        let mut assembler = MessageAssembler::new(MAX);
        assembler
            .push(Frame::fragment(Opcode::Text, false, "ab"))
            .unwrap();
        let err = assembler.push(Frame::text("oops")).unwrap_err();
        assert!(matches!(err, WsError::ProtocolViolation(_)));
    }

    #[test]
    fn orphan_continuation_is_rejected() {
        let mut assembler = MessageAssembler::new(MAX);
        let err = assembler
            .push(Frame::fragment(Opcode::Continuation, true, "tail"))
            .unwrap_err();
        assert!(matches!(err, WsError::ProtocolViolation(_)));
    }

    #[test]
    fn size_cap_checked_on_every_fragment() {
        let mut assembler = MessageAssembler::new(8);
        assembler
            .push(Frame::fragment(Opcode::Binary, false, vec![0u8; 6]))
            .unwrap();
        let err = assembler
            .push(Frame::fragment(Opcode::Continuation, false, vec![0u8; 6]))
            .unwrap_err();
        assert!(matches!(err, WsError::MessageTooLarge { size: 12, max: 8 }));
    }

    #[test]
    fn size_cap_applies_to_single_frame() {
        let mut assembler = MessageAssembler::new(4);
        let err = assembler.push(Frame::binary(vec![0u8; 5])).unwrap_err();
        assert!(matches!(err, WsError::MessageTooLarge { .. }));
    }

    #[test]
    fn assembler_reusable_after_completion() {
        let mut assembler = MessageAssembler::new(MAX);
        assembler
            .push(Frame::fragment(Opcode::Text, false, "he"))
            .unwrap();
        let first = assembler
            .push(Frame::fragment(Opcode::Continuation, true, "llo"))
            .unwrap()
            .unwrap();
        assert_eq!(first, Message::text("hello"));

        let second = assembler.push(Frame::text("again")).unwrap().unwrap();
        assert_eq!(second, Message::text("again"));
    }

    #[test]
    fn message_conversions() {
        assert!(Message::from("hi").is_text());
        assert!(Message::from(vec![1u8]).is_binary());
        assert_eq!(Message::text("abc").len(), 3);
        assert_eq!(
            Message::text("abc").into_payload(),
            Bytes::from_static(b"abc")
        );
    }
}
