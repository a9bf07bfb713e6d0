//! Error types for the protocol layer.
//!
//! Each crate in wsmux defines its own error enum. A `ProtocolError` always
//! means the problem is in the vocabulary or in a frame's bytes, never in
//! networking or routing.

use crate::Direction;

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// A name was registered twice in the same direction.
    ///
    /// This is a configuration error: the first registration is kept.
    #[error("{direction} message {name:?} is already registered")]
    DuplicateName { direction: Direction, name: String },

    /// A direction already holds 256 names; codes are single bytes.
    #[error("{direction} vocabulary is full (256 names)")]
    VocabularyFull { direction: Direction },

    /// Message names must be non-empty.
    #[error("message name must not be empty")]
    InvalidName,

    /// Encoding was asked for a name the vocabulary does not know.
    #[error("unknown {direction} message name {name:?}")]
    UnknownMessage { direction: Direction, name: String },

    /// The frame ends before its header does.
    #[error("frame too short")]
    FrameTooShort,

    /// A name on the wire is not valid UTF-8.
    #[error("message name is not valid UTF-8: {0}")]
    NameNotUtf8(#[source] std::str::Utf8Error),

    /// The name does not fit in a one-byte length prefix.
    #[error("message name of {0} bytes is too long for the wire")]
    NameTooLong(usize),

    /// Serializing a payload failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserializing a payload failed.
    ///
    /// Common causes: malformed JSON, missing required fields, wrong types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}

impl ProtocolError {
    /// Returns `true` for errors that can only come from setup code
    /// (registering names), as opposed to traffic.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. } | Self::VocabularyFull { .. } | Self::InvalidName
        )
    }
}
