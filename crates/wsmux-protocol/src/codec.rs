//! Codec trait and the two wire framings.
//!
//! A codec turns `(name, payload)` into one frame and back, using a
//! [`Vocabulary`] to know which names exist. Payloads are opaque bytes; a
//! frame carries exactly one message, so no length field is needed for the
//! payload: it is the remainder of the frame.
//!
//! - [`CodeCodec`] (default): `[code][payload...]`, one byte of overhead.
//! - [`NameCodec`]: `[name_len][name...][payload...]`, self-describing at
//!   the cost of larger frames.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Code, Direction, ProtocolError, Vocabulary};

/// What identified a message on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageKey {
    Code(Code),
    Name(String),
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "#{code}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// The key exactly as it appeared on the wire.
    pub key: MessageKey,
    /// The registered code `key` resolves to, or `None` when the vocabulary
    /// has no such message in the decoded direction.
    pub code: Option<Code>,
    /// Everything after the header.
    pub payload: Vec<u8>,
}

/// Encodes and decodes frames for a vocabulary.
///
/// Implementations must refuse to encode names the vocabulary does not
/// know; they never substitute a default code.
pub trait Codec: Send + Sync + 'static {
    /// Builds the frame for `name` in `direction`.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownMessage`] if `name` is not registered in
    /// `direction`.
    fn encode(
        &self,
        vocab: &Vocabulary,
        direction: Direction,
        name: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError>;

    /// Splits a frame into its key and payload.
    ///
    /// An unregistered key is not an error here: it is reported through
    /// [`Decoded::code`] being `None` so callers can route it to a fallback.
    ///
    /// # Errors
    /// [`ProtocolError::FrameTooShort`] if the frame cannot hold a header.
    fn decode(
        &self,
        vocab: &Vocabulary,
        direction: Direction,
        frame: &[u8],
    ) -> Result<Decoded, ProtocolError>;
}

fn lookup(
    vocab: &Vocabulary,
    direction: Direction,
    name: &str,
) -> Result<Code, ProtocolError> {
    vocab
        .code(direction, name)
        .ok_or_else(|| ProtocolError::UnknownMessage {
            direction,
            name: name.to_owned(),
        })
}

// ---------------------------------------------------------------------------
// CodeCodec
// ---------------------------------------------------------------------------

/// One leading code byte followed by the raw payload.
///
/// ```rust
/// use wsmux_protocol::{Codec, CodeCodec, Direction, MessageKey, Vocabulary};
///
/// let mut vocab = Vocabulary::new();
/// vocab.register(Direction::Outbound, "state").unwrap();
///
/// let frame = CodeCodec.encode(&vocab, Direction::Outbound, "state", b"{}").unwrap();
/// assert_eq!(frame, b"\x00{}");
///
/// let decoded = CodeCodec.decode(&vocab, Direction::Outbound, &frame).unwrap();
/// assert_eq!(decoded.key, MessageKey::Code(0));
/// assert_eq!(decoded.code, Some(0));
/// assert_eq!(decoded.payload, b"{}");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeCodec;

impl Codec for CodeCodec {
    fn encode(
        &self,
        vocab: &Vocabulary,
        direction: Direction,
        name: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        let code = lookup(vocab, direction, name)?;
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(code);
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    fn decode(
        &self,
        vocab: &Vocabulary,
        direction: Direction,
        frame: &[u8],
    ) -> Result<Decoded, ProtocolError> {
        let (&code, payload) =
            frame.split_first().ok_or(ProtocolError::FrameTooShort)?;
        Ok(Decoded {
            key: MessageKey::Code(code),
            code: vocab.contains_code(direction, code).then_some(code),
            payload: payload.to_vec(),
        })
    }
}

// ---------------------------------------------------------------------------
// NameCodec
// ---------------------------------------------------------------------------

/// A one-byte name length, the name itself, then the raw payload.
///
/// Larger frames than [`CodeCodec`], but a peer can read them without
/// knowing the registration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameCodec;

impl Codec for NameCodec {
    fn encode(
        &self,
        vocab: &Vocabulary,
        direction: Direction,
        name: &str,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        lookup(vocab, direction, name)?;
        let len = u8::try_from(name.len())
            .map_err(|_| ProtocolError::NameTooLong(name.len()))?;

        let mut frame = Vec::with_capacity(1 + name.len() + payload.len());
        frame.push(len);
        frame.extend_from_slice(name.as_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    fn decode(
        &self,
        vocab: &Vocabulary,
        direction: Direction,
        frame: &[u8],
    ) -> Result<Decoded, ProtocolError> {
        let (&len, rest) =
            frame.split_first().ok_or(ProtocolError::FrameTooShort)?;
        let len = usize::from(len);
        if rest.len() < len {
            return Err(ProtocolError::FrameTooShort);
        }
        let (name, payload) = rest.split_at(len);
        let name = std::str::from_utf8(name)
            .map_err(ProtocolError::NameNotUtf8)?
            .to_owned();

        Ok(Decoded {
            code: vocab.code(direction, &name),
            key: MessageKey::Name(name),
            payload: payload.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        let mut v = Vocabulary::new();
        v.register(Direction::Outbound, "state").unwrap();
        v.register(Direction::Outbound, "error").unwrap();
        v.register(Direction::Inbound, "explore").unwrap();
        v
    }

    #[test]
    fn test_code_codec_prefixes_code() {
        let frame = CodeCodec
            .encode(&vocab(), Direction::Outbound, "error", b"oops")
            .unwrap();
        assert_eq!(frame, b"\x01oops");
    }

    #[test]
    fn test_code_codec_round_trip_keeps_arbitrary_bytes() {
        let v = vocab();
        let payload = [0u8, 255, 1, 0, 42];
        let frame = CodeCodec
            .encode(&v, Direction::Outbound, "state", &payload)
            .unwrap();
        let decoded = CodeCodec.decode(&v, Direction::Outbound, &frame).unwrap();
        assert_eq!(decoded.code, v.code(Direction::Outbound, "state"));
        assert_eq!(decoded.payload, payload);
    }

    #[test]
    fn test_code_codec_empty_payload() {
        let v = vocab();
        let frame = CodeCodec.encode(&v, Direction::Outbound, "state", b"").unwrap();
        assert_eq!(frame, [0u8]);
        let decoded = CodeCodec.decode(&v, Direction::Outbound, &frame).unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_code_codec_unknown_name_fails_fast() {
        let err = CodeCodec
            .encode(&vocab(), Direction::Outbound, "explore", b"")
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::UnknownMessage { direction: Direction::Outbound, ref name }
                if name == "explore"
        ));
    }

    #[test]
    fn test_code_codec_empty_frame_is_too_short() {
        let err = CodeCodec.decode(&vocab(), Direction::Inbound, &[]).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooShort));
    }

    #[test]
    fn test_code_codec_unregistered_code_decodes_without_code() {
        let decoded = CodeCodec
            .decode(&vocab(), Direction::Inbound, &[9, 1, 2])
            .unwrap();
        assert_eq!(decoded.key, MessageKey::Code(9));
        assert_eq!(decoded.code, None);
        assert_eq!(decoded.payload, [1u8, 2]);
    }

    #[test]
    fn test_name_codec_layout() {
        let frame = NameCodec
            .encode(&vocab(), Direction::Outbound, "state", b"{}")
            .unwrap();
        assert_eq!(frame, b"\x05state{}");

        let decoded = NameCodec
            .decode(&vocab(), Direction::Outbound, &frame)
            .unwrap();
        assert_eq!(decoded.key, MessageKey::Name("state".into()));
        assert_eq!(decoded.code, Some(0));
        assert_eq!(decoded.payload, b"{}");
    }

    #[test]
    fn test_name_codec_rejects_truncated_name() {
        let err = NameCodec
            .decode(&vocab(), Direction::Inbound, b"\x07expl")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooShort));
    }

    #[test]
    fn test_name_codec_rejects_invalid_utf8_name() {
        let err = NameCodec
            .decode(&vocab(), Direction::Inbound, b"\x02\xff\xfeHi")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NameNotUtf8(_)));
    }

    #[test]
    fn test_name_codec_unknown_inbound_name() {
        let decoded = NameCodec
            .decode(&vocab(), Direction::Inbound, b"\x04chatHi")
            .unwrap();
        assert_eq!(decoded.key, MessageKey::Name("chat".into()));
        assert_eq!(decoded.code, None);
        assert_eq!(decoded.payload, b"Hi");
    }

    #[test]
    fn test_name_codec_name_too_long() {
        let long = "n".repeat(300);
        let mut v = Vocabulary::new();
        v.register(Direction::Outbound, &long).unwrap();
        let err = NameCodec
            .encode(&v, Direction::Outbound, &long, b"")
            .unwrap_err();
        assert!(matches!(err, ProtocolError::NameTooLong(300)));
    }

    #[test]
    fn test_message_key_display() {
        assert_eq!(MessageKey::Code(3).to_string(), "#3");
        assert_eq!(MessageKey::Name("flag".into()).to_string(), "flag");
    }
}
