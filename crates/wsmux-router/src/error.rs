//! Error types for the router layer.

use wsmux_protocol::ProtocolError;
use wsmux_transport::ConnectionId;

/// The error type handlers return.
///
/// Boxed so application code can use `?` on any error type it likes.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during routing and fanout.
///
/// A fanout to a client or room with nobody connected is not an error; it
/// succeeds and reaches zero sockets.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The target socket has been torn down.
    #[error("socket {0} is closed")]
    SocketClosed(ConnectionId),

    /// The socket's outbound queue stayed full past the send timeout.
    /// The socket has been torn down as a slow consumer.
    #[error("socket {0} did not accept the frame in time")]
    SendTimeout(ConnectionId),

    /// The operation needs a client identity and the socket has none.
    #[error("socket {0} has no client identity")]
    Anonymous(ConnectionId),
}
