//! Unified error type for wsmux.

use wsmux_protocol::ProtocolError;
use wsmux_router::RouterError;
use wsmux_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `wsmux` meta-crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]` attribute
/// on each variant auto-generates `From` impls, so the `?` operator converts
/// sub-crate errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WsmuxError {
    /// A transport-level error (bind, accept, handshake, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (registration, encode, decode).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A routing error (closed socket, slow consumer, anonymous socket).
    #[error(transparent)]
    Router(#[from] RouterError),

    /// The server was configured inconsistently.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Server configuration mistakes, reported by [`ServerBuilder`].
///
/// [`ServerBuilder`]: crate::ServerBuilder
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Two sub-protocols share a name.
    #[error("sub-protocol {0:?} is registered twice")]
    DuplicateSubprotocol(String),

    /// The default sub-protocol names nothing that was registered.
    #[error("default sub-protocol {0:?} is not registered")]
    UnknownSubprotocol(String),

    /// A server with no sub-protocols could never route a connection.
    #[error("no sub-protocols registered")]
    NoSubprotocols,
}
