//! Sub-protocol routing for wsmux.
//!
//! A [`Subprotocol`] owns everything one negotiated protocol needs at
//! runtime: its frozen vocabulary and handler table, and the registries of
//! open sockets, client identities, and rooms. Each connection becomes a
//! [`Socket`] driven by a read pump and a write pump.
//!
//! # Key types
//!
//! - [`SubprotocolBuilder`]: registers outbound names and inbound handlers
//! - [`Subprotocol`]: dispatch, fanout (`send_to_*`, `broadcast`), rooms
//! - [`Socket`]: handle to one open connection
//! - [`ClientId`] / [`ClientIdResolver`]: who a socket belongs to
//! - [`SocketConfig`]: keepalive, deadlines, and outbound queue size
//!
//! # Delivery
//!
//! Frames to one socket arrive in the order they were enqueued, and one
//! socket's inbound messages are handled one at a time, in arrival order.
//! Nothing is ordered across sockets.

mod client;
mod config;
mod error;
mod handler;
mod pump;
mod registry;
mod socket;
mod subprotocol;

pub use client::{ClientId, ClientIdResolver, FromHeader, FromQuery};
pub use config::{MAX_WAIT, MIN_PING_PERIOD, MIN_PONG_WAIT, SocketConfig};
pub use error::{HandlerError, RouterError};
pub use socket::{Frame, Socket};
pub use subprotocol::{DispatchOutcome, Subprotocol, SubprotocolBuilder};
