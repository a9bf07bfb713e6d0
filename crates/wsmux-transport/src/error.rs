/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// The upgrade handshake was rejected or did not complete in time.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The peer sent a frame larger than the configured maximum.
    ///
    /// This is a protocol violation: the frame is never truncated.
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Size of the offending frame, in bytes.
        size: usize,
        /// The configured maximum frame size.
        max: usize,
    },

    /// The transport was shut down.
    #[error("transport shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns `true` if the error means the peer went away in an ordinary
    /// way (as opposed to a protocol violation or I/O failure worth a warning).
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::ConnectionClosed(_) | Self::Shutdown => true,
            Self::ReceiveFailed(e) | Self::SendFailed(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }
}
