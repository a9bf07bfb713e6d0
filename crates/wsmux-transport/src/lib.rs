//! Transport abstraction layer for wsmux.
//!
//! Provides the [`Transport`] and [`Connection`] traits that abstract over an
//! already-upgraded, message-framed, full-duplex connection. A connection is
//! split into a [`ConnectionReader`] and a [`ConnectionWriter`] so that the
//! read side and the write side can be owned by two independent tasks.
//!
//! Deadlines are not part of the traits: callers bound each `recv`/`send`
//! future with `tokio::time::timeout`, which is the async equivalent of
//! arming a read or write deadline on a blocking socket.
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`
//! - `memory`: in-process transport over channels, for tests

mod config;
mod error;
#[cfg(feature = "memory")]
pub mod memory;
mod request;
#[cfg(feature = "websocket")]
mod websocket;

pub use config::TransportConfig;
pub use error::TransportError;
pub use request::RequestContext;
#[cfg(feature = "websocket")]
pub use websocket::{
    WebSocketConnection, WebSocketReader, WebSocketTransport, WebSocketWriter,
};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for generating unique connection IDs across all transports.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Allocates the next process-unique `ConnectionId`.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Something received from the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A complete data frame.
    Data(Vec<u8>),
    /// A ping control frame. Transports answer it with a pong themselves;
    /// readers only report it.
    Ping,
    /// A pong control frame, the answer to one of our pings.
    Pong,
}

/// A control frame the writer can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Ping,
    Pong,
    Close,
}

/// Accepts new incoming connections.
pub trait Transport: Send + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next upgraded connection.
    fn accept(
        &mut self,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;

    /// Gracefully shuts down the transport, stopping new connections.
    fn shutdown(
        &mut self,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// A single upgraded connection, before it is split into its two halves.
pub trait Connection: Send + 'static {
    /// The read half.
    type Reader: ConnectionReader;
    /// The write half.
    type Writer: ConnectionWriter;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;

    /// Returns the context of the request that opened this connection.
    fn request(&self) -> &RequestContext;

    /// Splits the connection into independently owned read and write halves.
    ///
    /// The connection is fully closed once both halves are dropped.
    fn into_split(self) -> (Self::Reader, Self::Writer);
}

/// The receiving half of a connection.
pub trait ConnectionReader: Send + 'static {
    /// Receives the next frame from the peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed. Frames
    /// larger than the transport's limit yield
    /// [`TransportError::FrameTooLarge`].
    fn recv(
        &mut self,
    ) -> impl Future<Output = Result<Option<Incoming>, TransportError>> + Send;
}

/// The sending half of a connection.
pub trait ConnectionWriter: Send + 'static {
    /// Sends one data frame to the peer.
    fn send(
        &mut self,
        frame: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Sends a control frame.
    fn send_control(
        &mut self,
        control: Control,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Flushes and closes the write side of the connection.
    fn close(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
