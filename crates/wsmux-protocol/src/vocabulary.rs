//! Message vocabularies: the name ↔ code tables of one sub-protocol.
//!
//! A sub-protocol has two independent tables. Outbound names are what the
//! server may send, inbound names are what it accepts. Codes are assigned
//! sequentially from 0 in registration order, separately per direction, so
//! outbound code 0 and inbound code 0 are unrelated.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// The single-byte identifier that stands in for a name on the wire.
pub type Code = u8;

/// Number of distinct codes a direction can hold.
pub const MAX_CODES: usize = 256;

/// Which table a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Server → client.
    Outbound,
    /// Client → server.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Outbound => f.write_str("outbound"),
            Self::Inbound => f.write_str("inbound"),
        }
    }
}

/// One direction's table.
#[derive(Debug, Clone, Default)]
struct CodeTable {
    /// Names indexed by code.
    names: Vec<String>,
    codes: HashMap<String, Code>,
}

impl CodeTable {
    fn register(
        &mut self,
        direction: Direction,
        name: &str,
    ) -> Result<Code, ProtocolError> {
        if name.is_empty() {
            return Err(ProtocolError::InvalidName);
        }
        if self.codes.contains_key(name) {
            return Err(ProtocolError::DuplicateName {
                direction,
                name: name.to_owned(),
            });
        }
        let code = Code::try_from(self.names.len())
            .map_err(|_| ProtocolError::VocabularyFull { direction })?;

        self.names.push(name.to_owned());
        self.codes.insert(name.to_owned(), code);
        Ok(code)
    }
}

/// The outbound and inbound name tables of one sub-protocol.
///
/// # Example
///
/// ```rust
/// use wsmux_protocol::{Direction, Vocabulary};
///
/// let mut vocab = Vocabulary::new();
/// assert_eq!(vocab.register(Direction::Outbound, "state").unwrap(), 0);
/// assert_eq!(vocab.register(Direction::Inbound, "explore").unwrap(), 0);
/// assert_eq!(vocab.register(Direction::Inbound, "flag").unwrap(), 1);
///
/// assert!(vocab.register(Direction::Inbound, "flag").is_err());
/// assert_eq!(vocab.code(Direction::Inbound, "flag"), Some(1));
/// assert_eq!(vocab.name(Direction::Outbound, 0), Some("state"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    outbound: CodeTable,
    inbound: CodeTable,
}

impl Vocabulary {
    /// Creates an empty vocabulary.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, direction: Direction) -> &CodeTable {
        match direction {
            Direction::Outbound => &self.outbound,
            Direction::Inbound => &self.inbound,
        }
    }

    /// Registers a name and returns the code assigned to it.
    ///
    /// # Errors
    /// - [`ProtocolError::DuplicateName`] if the name is already registered
    ///   in this direction. The existing registration is left untouched.
    /// - [`ProtocolError::VocabularyFull`] once 256 names are registered.
    /// - [`ProtocolError::InvalidName`] for an empty name.
    pub fn register(
        &mut self,
        direction: Direction,
        name: &str,
    ) -> Result<Code, ProtocolError> {
        match direction {
            Direction::Outbound => self.outbound.register(direction, name),
            Direction::Inbound => self.inbound.register(direction, name),
        }
    }

    /// Looks up the code registered for `name`.
    pub fn code(&self, direction: Direction, name: &str) -> Option<Code> {
        self.table(direction).codes.get(name).copied()
    }

    /// Looks up the name registered under `code`.
    pub fn name(&self, direction: Direction, code: Code) -> Option<&str> {
        self.table(direction)
            .names
            .get(usize::from(code))
            .map(String::as_str)
    }

    /// Returns `true` if `code` is assigned in this direction.
    pub fn contains_code(&self, direction: Direction, code: Code) -> bool {
        usize::from(code) < self.len(direction)
    }

    /// Number of names registered in a direction.
    pub fn len(&self, direction: Direction) -> usize {
        self.table(direction).names.len()
    }

    /// Returns `true` if neither direction has any names.
    pub fn is_empty(&self) -> bool {
        self.outbound.names.is_empty() && self.inbound.names.is_empty()
    }

    /// Iterates `(code, name)` pairs of a direction in code order.
    pub fn iter(
        &self,
        direction: Direction,
    ) -> impl Iterator<Item = (Code, &str)> + '_ {
        self.table(direction)
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| (i as Code, name.as_str()))
    }
}
