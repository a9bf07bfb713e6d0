//! Wire protocol for wsmux.
//!
//! This crate defines the vocabulary a sub-protocol speaks and how messages
//! are framed:
//!
//! - **Vocabulary** ([`Vocabulary`], [`Direction`]): the outbound and
//!   inbound name ↔ code tables.
//! - **Codec** ([`Codec`] trait, [`CodeCodec`], [`NameCodec`]): how a
//!   `(name, payload)` pair becomes one frame and back.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw frames) and the router
//! (handlers and fanout). It knows nothing about sockets or rooms.
//!
//! ```text
//! Transport (frames) → Protocol (code + payload) → Router (handlers)
//! ```

mod codec;
mod error;
#[cfg(feature = "json")]
pub mod json;
mod vocabulary;

pub use codec::{Codec, CodeCodec, Decoded, MessageKey, NameCodec};
pub use error::ProtocolError;
pub use vocabulary::{Code, Direction, MAX_CODES, Vocabulary};
