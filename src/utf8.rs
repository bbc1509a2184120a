//! Incremental UTF-8 validation for fragmented text messages.
//!
//! Text message payloads may be split at arbitrary byte positions, including
//! inside a multi-byte code point, so a text message accumulated across
//! continuation frames must be validated incrementally: a truncated code
//! point at the end of a fragment is fine until the final frame, while an
//! outright invalid sequence (overlong form, surrogate, byte beyond
//! U+10FFFF) must fail the message immediately.
//!
//! `std::str::from_utf8` draws exactly that line: `Utf8Error::error_len()`
//! is `None` for an unexpected end of input and `Some(_)` for an invalid
//! sequence, so the validator tracks how far the accumulated buffer has been
//! accepted and re-examines only the unchecked tail.

use crate::frame::WsError;

/// Incremental UTF-8 validator over an append-only byte buffer.
///
/// Feed the whole accumulated buffer after each append; only the tail past
/// the last accepted position is examined, so total work stays linear in
/// the message size.
#[derive(Debug, Default)]
pub struct Utf8Validator {
    /// Number of leading bytes already accepted as valid UTF-8.
    valid: usize,
}

impl Utf8Validator {
    /// Create a validator in the accepting state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset for a new message.
    pub fn reset(&mut self) {
        self.valid = 0;
    }

    /// Validate the unchecked tail of the accumulated buffer.
    ///
    /// A truncated final code point is accepted (it may be completed by the
    /// next fragment).
    ///
    /// # Errors
    ///
    /// Returns `WsError::InvalidUtf8` on any invalid byte sequence.
    pub fn advance(&mut self, buf: &[u8]) -> Result<(), WsError> {
        debug_assert!(self.valid <= buf.len());
        match std::str::from_utf8(&buf[self.valid..]) {
            Ok(_) => {
                self.valid = buf.len();
                Ok(())
            }
            Err(e) if e.error_len().is_none() => {
                // Clean truncation mid code point.
                self.valid += e.valid_up_to();
                Ok(())
            }
            Err(_) => Err(WsError::InvalidUtf8),
        }
    }

    /// Validate the final fragment: the buffer must now be complete UTF-8,
    /// with no dangling partial code point.
    ///
    /// # Errors
    ///
    /// Returns `WsError::InvalidUtf8` for an invalid sequence or a message
    /// ending inside a code point.
    pub fn finish(&mut self, buf: &[u8]) -> Result<(), WsError> {
        self.advance(buf)?;
        if self.valid == buf.len() {
            Ok(())
        } else {
            Err(WsError::InvalidUtf8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_complete(bytes: &[u8]) -> Result<(), WsError> {
        let mut v = Utf8Validator::new();
        v.finish(bytes)
    }

    #[test]
    fn accepts_ascii_and_multibyte() {
        assert!(check_complete(b"Hello").is_ok());
        assert!(check_complete("héllo wörld".as_bytes()).is_ok());
        assert!(check_complete("κόσμε".as_bytes()).is_ok());
        assert!(check_complete("𐍈".as_bytes()).is_ok());
        assert!(check_complete(&[]).is_ok());
    }

    #[test]
    fn rejects_invalid_sequences() {
        // Bare continuation byte.
        assert!(check_complete(&[0x80]).is_err());
        // Overlong encoding of '/'.
        assert!(check_complete(&[0xC0, 0xAF]).is_err());
        // Overlong encoding of NUL.
        assert!(check_complete(&[0xC0, 0x80]).is_err());
        // UTF-16 surrogate U+D800.
        assert!(check_complete(&[0xED, 0xA0, 0x80]).is_err());
        // Beyond U+10FFFF.
        assert!(check_complete(&[0xF4, 0x90, 0x80, 0x80]).is_err());
        // 0xFF is never valid.
        assert!(check_complete(&[0xFF]).is_err());
    }

    #[test]
    fn rejects_truncated_message() {
        // Lead byte of a 2-byte sequence with no continuation at the end.
        assert!(check_complete(&[0xC3]).is_err());
        assert!(check_complete(b"ok\xE2\x82").is_err());
    }

    #[test]
    fn accepts_code_point_split_across_fragments() {
        // "é" = C3 A9 split between two fragments.
        let mut v = Utf8Validator::new();
        let mut buf = vec![0xC3];
        v.advance(&buf).unwrap();
        buf.push(0xA9);
        v.finish(&buf).unwrap();
    }

    #[test]
    fn rejects_invalid_continuation_at_fragment_boundary() {
        // C3 expects a continuation byte; '(' is not one.
        let mut v = Utf8Validator::new();
        let mut buf = vec![0xC3];
        v.advance(&buf).unwrap();
        buf.push(0x28);
        assert!(v.advance(&buf).is_err());
    }

    #[test]
    fn every_split_position_of_multibyte_text() {
        // Fragment boundaries must never change acceptance.
        let text = "aé€𐍈z".as_bytes();
        for split in 0..=text.len() {
            let mut v = Utf8Validator::new();
            let mut buf = text[..split].to_vec();
            v.advance(&buf).unwrap();
            buf.extend_from_slice(&text[split..]);
            v.finish(&buf).unwrap();
        }
    }

    #[test]
    fn four_byte_sequence_fed_byte_by_byte() {
        let bytes = "𐍈".as_bytes();
        let mut v = Utf8Validator::new();
        let mut buf = Vec::new();
        for &b in bytes {
            buf.push(b);
            v.advance(&buf).unwrap();
        }
        v.finish(&buf).unwrap();
    }

    #[test]
    fn surrogate_rejected_as_soon_as_visible() {
        // ED A0 is already known-bad before the third byte arrives.
        let mut v = Utf8Validator::new();
        let buf = vec![0xED, 0xA0];
        assert!(v.advance(&buf).is_err());
    }

    #[test]
    fn matches_reference_decoder_on_random_inputs() {
        // Cross-check chunked validation against std's one-shot decoder.
        let samples: &[&[u8]] = &[
            b"plain ascii",
            "π≈3.14159".as_bytes(),
            &[0xE2, 0x82, 0xAC, 0xC3, 0xA9],
            &[0x41, 0xC0, 0xAF, 0x42],
            &[0xF0, 0x9F, 0x92, 0x96],
            &[0xF0, 0x28, 0x8C, 0xBC],
            &[0xED, 0x9F, 0xBF],
            &[0xEE, 0x80, 0x80],
        ];
        for sample in samples {
            for split in 0..=sample.len() {
                let mut v = Utf8Validator::new();
                let mut buf = sample[..split].to_vec();
                let first = v.advance(&buf);
                buf.extend_from_slice(&sample[split..]);
                let outcome = first.and_then(|()| v.finish(&buf));
                assert_eq!(
                    outcome.is_ok(),
                    std::str::from_utf8(sample).is_ok(),
                    "sample {sample:?} split at {split}"
                );
            }
        }
    }
}
