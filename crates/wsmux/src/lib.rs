//! # wsmux
//!
//! Multiplex application sub-protocols over WebSocket connections.
//!
//! Each connection negotiates a sub-protocol during the upgrade. The
//! [`Subprotocol`] registered under that name takes the connection over:
//! it decodes every inbound frame (a one-byte message code followed by the
//! payload), runs the matching handler, and lets handlers reach any socket,
//! any client (all of its sockets), any room, or everyone.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use wsmux::prelude::*;
//!
//! # async fn run() -> Result<(), WsmuxError> {
//! let mut chat = Subprotocol::builder("chat.v1");
//! chat.outbound("said")?;
//! chat.inbound("say", |socket: Socket, payload: Vec<u8>| async move {
//!     socket.subprotocol().broadcast("said", &payload).await?;
//!     Ok::<_, HandlerError>(())
//! })?;
//! chat.client_id(FromQuery("user".into()));
//!
//! let server = Server::builder()
//!     .bind("0.0.0.0:8080")
//!     .subprotocol(chat.build())?
//!     .build()
//!     .await?;
//! server.run().await
//! # }
//! ```
//!
//! ## Crates
//!
//! - [`transport`]: connection traits, WebSocket and in-memory transports
//! - [`protocol`]: vocabularies and codecs
//! - [`router`]: sub-protocols, sockets, rooms, fanout

mod error;
mod server;

pub use error::{ConfigError, WsmuxError};
pub use server::{Server, ServerBuilder};

pub use wsmux_protocol as protocol;
pub use wsmux_router as router;
pub use wsmux_transport as transport;

pub use wsmux_router::{
    ClientId, ClientIdResolver, DispatchOutcome, FromHeader, FromQuery, HandlerError,
    RouterError, Socket, SocketConfig, Subprotocol, SubprotocolBuilder,
};

/// Everything an application needs to define and serve sub-protocols.
pub mod prelude {
    #[cfg(feature = "json")]
    pub use wsmux_protocol::json;
    pub use wsmux_protocol::MessageKey;

    pub use crate::{
        ClientId, ClientIdResolver, ConfigError, DispatchOutcome, FromHeader, FromQuery,
        HandlerError, RouterError, Server, ServerBuilder, Socket, SocketConfig, Subprotocol,
        SubprotocolBuilder, WsmuxError,
    };
}
