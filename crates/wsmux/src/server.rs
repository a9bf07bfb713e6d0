//! `ServerBuilder` and the server accept loop.
//!
//! This is the entry point for running a wsmux server. It ties the layers
//! together: the transport accepts and upgrades connections, the server
//! picks the [`Subprotocol`] matching the negotiated sub-protocol, and that
//! sub-protocol takes the connection over.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, info, warn};
use wsmux_router::{SocketConfig, Subprotocol};
use wsmux_transport::{
    Connection, ConnectionWriter, Control, RequestContext, Transport, TransportConfig,
    TransportError, WebSocketTransport,
};

use crate::{ConfigError, WsmuxError};

/// Builder for configuring and starting a wsmux server.
///
/// # Example
///
/// ```rust,ignore
/// use wsmux::prelude::*;
///
/// let server = Server::builder()
///     .bind("0.0.0.0:8080")
///     .subprotocol(game)?
///     .default_subprotocol("game.v1")
///     .build()
///     .await?;
/// server.run().await
/// ```
pub struct ServerBuilder {
    bind_addr: String,
    socket_config: SocketConfig,
    transport_config: TransportConfig,
    subprotocols: Vec<Subprotocol>,
    default_subprotocol: Option<String>,
}

impl ServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            socket_config: SocketConfig::default(),
            transport_config: TransportConfig::default(),
            subprotocols: Vec::new(),
            default_subprotocol: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Sets the keepalive, deadline, and queue settings for every socket.
    pub fn socket_config(mut self, config: SocketConfig) -> Self {
        self.socket_config = config;
        self
    }

    /// Sets the largest frame accepted from a peer (default 512 bytes).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.transport_config.max_frame_size = bytes;
        self
    }

    /// Sets how long an upgrade handshake may take (default 10s).
    pub fn handshake_timeout(mut self, limit: Duration) -> Self {
        self.transport_config.handshake_timeout = limit;
        self
    }

    /// Adds a sub-protocol. Registration order is the server's preference
    /// order only as a tie-break; the client's offer order decides first.
    ///
    /// # Errors
    /// [`ConfigError::DuplicateSubprotocol`] if one with the same name was
    /// already added.
    pub fn subprotocol(mut self, subprotocol: Subprotocol) -> Result<Self, ConfigError> {
        if self.subprotocols.iter().any(|sp| sp.name() == subprotocol.name()) {
            return Err(ConfigError::DuplicateSubprotocol(subprotocol.name().to_owned()));
        }
        self.subprotocols.push(subprotocol);
        Ok(self)
    }

    /// Names the sub-protocol used when a client negotiates none.
    ///
    /// Without a default, such connections are closed. An unknown name is
    /// reported by [`build`](Self::build).
    pub fn default_subprotocol(mut self, name: &str) -> Self {
        self.default_subprotocol = Some(name.to_owned());
        self
    }

    /// Binds a WebSocket listener and returns the server, ready to run.
    pub async fn build(self) -> Result<Server<WebSocketTransport>, WsmuxError> {
        let mut transport_config = self.transport_config.clone();
        transport_config.subprotocols = self
            .subprotocols
            .iter()
            .map(|sp| sp.name().to_owned())
            .collect();

        // Validate before binding so a bad config never holds the port.
        let routes = self.routes()?;
        let transport = WebSocketTransport::bind(&self.bind_addr, transport_config).await?;
        info!(addr = %self.bind_addr, "listening");
        Ok(Server {
            transport,
            routes: Arc::new(routes),
            socket_config: self.socket_config,
        })
    }

    /// Returns a server over a caller-supplied transport.
    ///
    /// The transport does its own sub-protocol negotiation;
    /// `max_frame_size` and `handshake_timeout` set on this builder do not
    /// apply to it.
    pub fn build_with<T: Transport>(self, transport: T) -> Result<Server<T>, WsmuxError> {
        let routes = self.routes()?;
        Ok(Server {
            transport,
            routes: Arc::new(routes),
            socket_config: self.socket_config,
        })
    }

    fn routes(&self) -> Result<Routes, ConfigError> {
        if self.subprotocols.is_empty() {
            return Err(ConfigError::NoSubprotocols);
        }
        let by_name: HashMap<_, _> = self
            .subprotocols
            .iter()
            .map(|sp| (sp.name().to_owned(), sp.clone()))
            .collect();

        let fallback = match &self.default_subprotocol {
            Some(name) => Some(
                by_name
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownSubprotocol(name.clone()))?,
            ),
            None => None,
        };
        Ok(Routes { by_name, fallback })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Sub-protocols by name, plus the one used when nothing was negotiated.
struct Routes {
    by_name: HashMap<String, Subprotocol>,
    fallback: Option<Subprotocol>,
}

impl Routes {
    fn resolve(&self, request: &RequestContext) -> Option<&Subprotocol> {
        match request.subprotocol.as_deref() {
            Some(name) => self.by_name.get(name),
            None => self.fallback.as_ref(),
        }
    }
}

/// A wsmux server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct Server<T: Transport = WebSocketTransport> {
    transport: T,
    routes: Arc<Routes>,
    socket_config: SocketConfig,
}

impl Server<WebSocketTransport> {
    /// Creates a new builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }
}

impl<T: Transport> Server<T> {
    /// Looks up a registered sub-protocol by name.
    pub fn subprotocol(&self, name: &str) -> Option<&Subprotocol> {
        self.routes.by_name.get(name)
    }

    /// Runs the accept loop until the transport shuts down.
    pub async fn run(self) -> Result<(), WsmuxError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `signal` completes, then stops accepting
    /// and tears down every open socket.
    pub async fn run_until(
        mut self,
        signal: impl Future<Output = ()> + Send,
    ) -> Result<(), WsmuxError> {
        let mut names: Vec<_> = self.routes.by_name.keys().cloned().collect();
        names.sort();
        info!(subprotocols = ?names, "wsmux server running");

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("shutdown requested");
                    break;
                }
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => route(&self.routes, &self.socket_config, conn),
                    Err(TransportError::Shutdown) => break,
                    Err(e) => warn!(error = %e, "accept failed"),
                },
            }
        }

        self.transport.shutdown().await?;
        for subprotocol in self.routes.by_name.values() {
            subprotocol.close_all();
        }
        info!("wsmux server stopped");
        Ok(())
    }
}

/// Hands a connection to its sub-protocol, or closes it if there is none.
fn route<C: Connection>(routes: &Routes, config: &SocketConfig, conn: C) {
    let Some(subprotocol) = routes.resolve(conn.request()) else {
        warn!(
            conn = %conn.id(),
            negotiated = ?conn.request().subprotocol,
            path = %conn.request().path,
            "no sub-protocol for connection, closing"
        );
        let write_wait = config.write_wait;
        tokio::spawn(async move {
            let (_reader, mut writer) = conn.into_split();
            let _ = timeout(write_wait, writer.send_control(Control::Close)).await;
            let _ = timeout(write_wait, writer.close()).await;
        });
        return;
    };

    let socket = subprotocol.connect(conn, config);
    debug!(
        socket = %socket.id(),
        subprotocol = %subprotocol.name(),
        client = ?socket.client_id(),
        "connection routed"
    );
}
