//! A named sub-protocol: its vocabulary, its handlers, and the sockets
//! currently speaking it.
//!
//! Configuration happens once, on a [`SubprotocolBuilder`]. After
//! [`build`](SubprotocolBuilder::build) the vocabulary and handler table
//! are frozen, so the hot path reads them without locking. Only the
//! registries (sockets, clients, rooms) change at runtime; they sit behind
//! a single mutex that is never held across an `.await`.
//!
//! # Fanout
//!
//! Every fanout operation encodes the frame once, snapshots its targets
//! under the lock, releases the lock, and then enqueues onto all targets
//! concurrently. A target that closes in between is skipped. Reaching zero
//! sockets is a success.

use std::{fmt, future::Future, sync::Arc};

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use wsmux_protocol::{Code, CodeCodec, Codec, Direction, MessageKey, ProtocolError, Vocabulary};
use wsmux_transport::{Connection, ConnectionId};

use crate::{
    ClientId, ClientIdResolver, HandlerError, RouterError, Socket, SocketConfig,
    handler::{self, Fallback, Handler},
    pump,
    registry::Registry,
    socket::Frame,
};

/// How [`Subprotocol::dispatch`] disposed of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A registered handler ran.
    Handled,
    /// No handler matched; the fallback ran.
    Fallback,
    /// No handler matched and there is no fallback; the frame was dropped.
    Dropped,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the vocabulary and handlers of a [`Subprotocol`].
///
/// ```rust,no_run
/// use wsmux_router::{HandlerError, Socket, Subprotocol};
///
/// # fn main() -> Result<(), wsmux_protocol::ProtocolError> {
/// let mut builder = Subprotocol::builder("chat.v1");
/// builder.outbound("said")?;
/// builder.inbound("say", |socket: Socket, payload: Vec<u8>| async move {
///     socket.subprotocol().broadcast("said", &payload).await?;
///     Ok::<_, HandlerError>(())
/// })?;
/// let chat = builder.build();
/// # Ok(())
/// # }
/// ```
pub struct SubprotocolBuilder {
    name: String,
    vocabulary: Vocabulary,
    handlers: Vec<Handler>,
    fallback: Option<Fallback>,
    resolver: Option<Arc<dyn ClientIdResolver>>,
    codec: Box<dyn Codec>,
}

impl SubprotocolBuilder {
    /// Registers a message this side sends. Codes are assigned in
    /// registration order, starting at 0.
    ///
    /// # Errors
    /// [`ProtocolError::DuplicateName`] if `name` is already an outbound
    /// message; the earlier registration is kept.
    pub fn outbound(&mut self, name: &str) -> Result<Code, ProtocolError> {
        self.vocabulary.register(Direction::Outbound, name)
    }

    /// Registers a message this side receives, together with its handler.
    ///
    /// Handlers for one socket run one at a time, in arrival order. A
    /// handler error is logged and does not close the socket.
    ///
    /// # Errors
    /// [`ProtocolError::DuplicateName`] if `name` is already an inbound
    /// message; the earlier registration and its handler are kept.
    pub fn inbound<F, Fut>(&mut self, name: &str, handler: F) -> Result<Code, ProtocolError>
    where
        F: Fn(Socket, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let code = self.vocabulary.register(Direction::Inbound, name)?;
        debug_assert_eq!(usize::from(code), self.handlers.len());
        self.handlers.push(handler::handler(handler));
        Ok(code)
    }

    /// Sets the handler for inbound messages nobody registered. Without
    /// one, such messages are dropped.
    pub fn fallback<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Socket, MessageKey, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.fallback = Some(handler::fallback(handler));
        self
    }

    /// Sets how a new socket's client identity is derived. Without a
    /// resolver every socket is anonymous.
    pub fn client_id(&mut self, resolver: impl ClientIdResolver) -> &mut Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    /// Replaces the default [`CodeCodec`] framing.
    pub fn codec(&mut self, codec: impl Codec) -> &mut Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn build(self) -> Subprotocol {
        debug!(
            subprotocol = %self.name,
            outbound = self.vocabulary.len(Direction::Outbound),
            inbound = self.vocabulary.len(Direction::Inbound),
            fallback = self.fallback.is_some(),
            "sub-protocol built"
        );
        Subprotocol {
            shared: Arc::new(Shared {
                name: self.name,
                vocabulary: self.vocabulary,
                handlers: self.handlers.into_boxed_slice(),
                fallback: self.fallback,
                resolver: self.resolver,
                codec: self.codec,
                registry: Mutex::new(Registry::new()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Subprotocol
// ---------------------------------------------------------------------------

/// A built sub-protocol. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Subprotocol {
    shared: Arc<Shared>,
}

struct Shared {
    name: String,
    vocabulary: Vocabulary,
    /// Indexed by inbound code.
    handlers: Box<[Handler]>,
    fallback: Option<Fallback>,
    resolver: Option<Arc<dyn ClientIdResolver>>,
    codec: Box<dyn Codec>,
    registry: Mutex<Registry<Socket>>,
}

impl Subprotocol {
    pub fn builder(name: impl Into<String>) -> SubprotocolBuilder {
        SubprotocolBuilder {
            name: name.into(),
            vocabulary: Vocabulary::new(),
            handlers: Vec::new(),
            fallback: None,
            resolver: None,
            codec: Box::new(CodeCodec),
        }
    }

    /// The sub-protocol name negotiated during the upgrade.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.shared.vocabulary
    }

    // -----------------------------------------------------------------------
    // Socket lifecycle
    // -----------------------------------------------------------------------

    /// Opens a socket over an upgraded connection: resolves its client
    /// identity, registers it, and spawns its read and write pumps.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect<C: Connection>(&self, conn: C, config: &SocketConfig) -> Socket {
        let config = config.clone().validated();
        let client_id = self
            .shared
            .resolver
            .as_ref()
            .and_then(|resolver| resolver.resolve(conn.request()));

        let (socket, queue) = Socket::new(
            conn.id(),
            client_id,
            conn.request().clone(),
            self.clone(),
            &config,
        );
        self.register(&socket);

        let (reader, writer) = conn.into_split();
        pump::spawn(socket.clone(), reader, writer, queue, config);
        socket
    }

    fn register(&self, socket: &Socket) {
        let mut registry = self.shared.registry.lock();
        registry.insert(socket.id(), socket.client_id(), socket.clone());
        debug!(
            subprotocol = %self.name(),
            socket = %socket.id(),
            client = ?socket.client_id(),
            sockets = registry.socket_count(),
            "socket registered"
        );
    }

    /// Removes a socket from every registry. Called by [`Socket::close`].
    pub(crate) fn unregister(&self, socket: &Socket) {
        let mut registry = self.shared.registry.lock();
        let removal = registry.remove(socket.id(), socket.client_id());
        debug!(
            subprotocol = %self.name(),
            socket = %socket.id(),
            client = ?socket.client_id(),
            registered = removal.socket,
            client_gone = removal.client_gone,
            rooms_deleted = removal.rooms_deleted,
            sockets = registry.socket_count(),
            "socket unregistered"
        );
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Decodes one inbound frame and runs the matching handler to
    /// completion.
    ///
    /// # Errors
    /// [`RouterError::Protocol`] if the frame is malformed. Handler errors
    /// are logged, not returned.
    pub async fn dispatch(
        &self,
        socket: &Socket,
        frame: &[u8],
    ) -> Result<DispatchOutcome, RouterError> {
        let decoded =
            self.shared
                .codec
                .decode(&self.shared.vocabulary, Direction::Inbound, frame)?;

        let handler = decoded
            .code
            .and_then(|code| self.shared.handlers.get(usize::from(code)));

        let (outcome, result) = match (handler, &self.shared.fallback) {
            (Some(handler), _) => {
                trace!(socket = %socket.id(), message = %decoded.key, "dispatching");
                let result = handler(socket.clone(), decoded.payload).await;
                (DispatchOutcome::Handled, result)
            }
            (None, Some(fallback)) => {
                trace!(socket = %socket.id(), message = %decoded.key, "no handler, using fallback");
                let result = fallback(socket.clone(), decoded.key.clone(), decoded.payload).await;
                (DispatchOutcome::Fallback, result)
            }
            (None, None) => {
                debug!(
                    subprotocol = %self.name(),
                    socket = %socket.id(),
                    message = %decoded.key,
                    "no handler for message, dropping"
                );
                return Ok(DispatchOutcome::Dropped);
            }
        };

        if let Err(e) = result {
            let message = decoded
                .code
                .and_then(|code| self.shared.vocabulary.name(Direction::Inbound, code))
                .map_or_else(|| decoded.key.to_string(), str::to_owned);
            warn!(
                subprotocol = %self.name(),
                socket = %socket.id(),
                client = ?socket.client_id(),
                %message,
                error = %e,
                "handler failed"
            );
        }
        Ok(outcome)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Encodes an outbound message once, ready to share between sockets.
    ///
    /// # Errors
    /// [`ProtocolError::UnknownMessage`] if `name` is not a registered
    /// outbound message.
    pub fn encode(&self, name: &str, payload: &[u8]) -> Result<Frame, RouterError> {
        let frame =
            self.shared
                .codec
                .encode(&self.shared.vocabulary, Direction::Outbound, name, payload)?;
        Ok(frame.into())
    }

    /// Sends one message to one socket.
    ///
    /// # Errors
    /// - [`RouterError::Protocol`] for an unregistered `name`.
    /// - [`RouterError::SocketClosed`] if the socket is gone.
    /// - [`RouterError::SendTimeout`] if it did not drain in time.
    pub async fn send_to_socket(
        &self,
        socket: &Socket,
        name: &str,
        payload: &[u8],
    ) -> Result<(), RouterError> {
        let frame = self.encode(name, payload)?;
        socket.enqueue(frame).await
    }

    /// Sends one message to an open socket by id. Returns `false` if no
    /// such socket is registered.
    pub async fn send_to_id(
        &self,
        id: ConnectionId,
        name: &str,
        payload: &[u8],
    ) -> Result<bool, RouterError> {
        let frame = self.encode(name, payload)?;
        let target = self.shared.registry.lock().socket(id);
        Ok(self.fanout(target.into_iter().collect(), frame).await == 1)
    }

    /// Sends one message to every socket of `client`. Returns how many
    /// sockets it reached; an unknown client reaches none.
    pub async fn send_to_client(
        &self,
        client: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<usize, RouterError> {
        let frame = self.encode(name, payload)?;
        let targets = self.shared.registry.lock().client_sockets(client);
        Ok(self.fanout(targets, frame).await)
    }

    /// Sends one message to every socket of every member of `room`.
    /// Returns how many sockets it reached; a missing room reaches none.
    pub async fn send_to_room(
        &self,
        room: &str,
        name: &str,
        payload: &[u8],
    ) -> Result<usize, RouterError> {
        let frame = self.encode(name, payload)?;
        let targets = self.shared.registry.lock().room_sockets(room);
        Ok(self.fanout(targets, frame).await)
    }

    /// Sends one message to every open socket, anonymous ones included.
    pub async fn broadcast(&self, name: &str, payload: &[u8]) -> Result<usize, RouterError> {
        let frame = self.encode(name, payload)?;
        let targets = self.shared.registry.lock().all();
        Ok(self.fanout(targets, frame).await)
    }

    #[cfg(feature = "json")]
    pub async fn send_json_to_client<T: serde::Serialize>(
        &self,
        client: &str,
        name: &str,
        value: &T,
    ) -> Result<usize, RouterError> {
        let payload = wsmux_protocol::json::to_payload(value)?;
        self.send_to_client(client, name, &payload).await
    }

    #[cfg(feature = "json")]
    pub async fn send_json_to_room<T: serde::Serialize>(
        &self,
        room: &str,
        name: &str,
        value: &T,
    ) -> Result<usize, RouterError> {
        let payload = wsmux_protocol::json::to_payload(value)?;
        self.send_to_room(room, name, &payload).await
    }

    #[cfg(feature = "json")]
    pub async fn broadcast_json<T: serde::Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<usize, RouterError> {
        let payload = wsmux_protocol::json::to_payload(value)?;
        self.broadcast(name, &payload).await
    }

    async fn fanout(&self, targets: Vec<Socket>, frame: Frame) -> usize {
        if targets.is_empty() {
            return 0;
        }
        let results = join_all(targets.iter().map(|socket| socket.enqueue(frame.clone()))).await;

        let mut reached = 0;
        for (socket, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => reached += 1,
                Err(e) => debug!(socket = %socket.id(), error = %e, "fanout skipped socket"),
            }
        }
        trace!(
            subprotocol = %self.name(),
            targets = targets.len(),
            reached,
            "fanout complete"
        );
        reached
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// Adds the socket's client to `room`, creating the room if needed.
    /// Joining a room the client is already in is a no-op.
    ///
    /// Membership belongs to the client, so every socket of the client
    /// receives room traffic.
    ///
    /// # Errors
    /// - [`RouterError::Anonymous`] if the socket has no client identity.
    /// - [`RouterError::SocketClosed`] if the socket is already torn down.
    pub fn join_room(&self, room: &str, socket: &Socket) -> Result<(), RouterError> {
        let client = socket
            .client_id()
            .ok_or(RouterError::Anonymous(socket.id()))?;

        let mut registry = self.shared.registry.lock();
        if !registry.contains(socket.id()) {
            return Err(RouterError::SocketClosed(socket.id()));
        }
        if registry.join(room, client) {
            debug!(subprotocol = %self.name(), %room, %client, "joined room");
        }
        Ok(())
    }

    /// Removes the socket's client from `room`. Deletes the room when it
    /// empties. A non-member (or anonymous socket) leaving is a no-op.
    pub fn leave_room(&self, room: &str, socket: &Socket) {
        let Some(client) = socket.client_id() else {
            return;
        };
        if self.shared.registry.lock().leave(room, client) {
            debug!(subprotocol = %self.name(), %room, %client, "left room");
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub fn socket_count(&self) -> usize {
        self.shared.registry.lock().socket_count()
    }

    /// Number of clients with at least one open socket.
    pub fn client_count(&self) -> usize {
        self.shared.registry.lock().client_count()
    }

    pub fn client_socket_count(&self, client: &str) -> usize {
        self.shared.registry.lock().client_socket_count(client)
    }

    pub fn room_count(&self) -> usize {
        self.shared.registry.lock().room_count()
    }

    /// Sorted members of `room`, or `None` if no such room exists.
    pub fn room_members(&self, room: &str) -> Option<Vec<ClientId>> {
        self.shared.registry.lock().room_members(room)
    }

    /// Sorted rooms `client` is a member of.
    pub fn rooms_of(&self, client: &str) -> Vec<String> {
        self.shared.registry.lock().rooms_of(client)
    }

    /// Snapshot of every open socket.
    pub fn sockets(&self) -> Vec<Socket> {
        self.shared.registry.lock().all()
    }

    /// Tears down every open socket.
    pub fn close_all(&self) {
        let sockets = self.sockets();
        debug!(subprotocol = %self.name(), count = sockets.len(), "closing all sockets");
        for socket in sockets {
            socket.close();
        }
    }
}

impl fmt::Debug for Subprotocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subprotocol")
            .field("name", &self.shared.name)
            .field("vocabulary", &self.shared.vocabulary)
            .field("fallback", &self.shared.fallback.is_some())
            .finish_non_exhaustive()
    }
}
