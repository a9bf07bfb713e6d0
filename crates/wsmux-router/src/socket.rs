//! A single open connection, as handlers and applications see it.
//!
//! A [`Socket`] is a cheap, cloneable handle. The connection itself is
//! owned by two tasks (see the `pump` module): the read pump, which
//! dispatches inbound frames, and the write pump, which is the only code
//! that ever writes to the transport. Everyone else reaches the peer by
//! putting frames on the socket's bounded outbound queue.
//!
//! Teardown ([`Socket::close`]) is idempotent. The first call removes the
//! socket from every registry of its [`Subprotocol`] and then signals both
//! pumps to stop; later calls do nothing.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::sync::{mpsc, watch};
use tracing::warn;
use wsmux_transport::{ConnectionId, RequestContext};

use crate::{ClientId, RouterError, SocketConfig, Subprotocol};

/// An encoded outbound frame, shared between every socket a fanout reaches.
pub type Frame = Arc<[u8]>;

/// Handle to one open connection.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Inner>,
}

struct Inner {
    id: ConnectionId,
    client_id: Option<ClientId>,
    request: RequestContext,
    subprotocol: Subprotocol,
    queue: mpsc::Sender<Frame>,
    send_timeout: Option<Duration>,
    closing: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl Socket {
    pub(crate) fn new(
        id: ConnectionId,
        client_id: Option<ClientId>,
        request: RequestContext,
        subprotocol: Subprotocol,
        config: &SocketConfig,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (queue, rx) = mpsc::channel(config.send_queue_capacity);
        let (shutdown, _) = watch::channel(false);
        let socket = Self {
            inner: Arc::new(Inner {
                id,
                client_id,
                request,
                subprotocol,
                queue,
                send_timeout: config.send_timeout,
                closing: AtomicBool::new(false),
                shutdown,
            }),
        };
        (socket, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// The client identity resolved when the socket opened; `None` if
    /// anonymous.
    pub fn client_id(&self) -> Option<&ClientId> {
        self.inner.client_id.as_ref()
    }

    /// The upgrade request that opened this socket.
    pub fn request(&self) -> &RequestContext {
        &self.inner.request
    }

    /// The sub-protocol this socket speaks.
    pub fn subprotocol(&self) -> &Subprotocol {
        &self.inner.subprotocol
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::Acquire)
    }

    /// Resolves once the socket has been torn down and unregistered.
    pub async fn closed(&self) {
        wait_closed(&mut self.inner.shutdown.subscribe()).await;
    }

    /// Sends one message to this socket's peer.
    pub async fn send(&self, name: &str, payload: &[u8]) -> Result<(), RouterError> {
        self.inner.subprotocol.send_to_socket(self, name, payload).await
    }

    /// Serializes `value` as JSON and sends it to this socket's peer.
    #[cfg(feature = "json")]
    pub async fn send_json<T: serde::Serialize>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), RouterError> {
        let payload = wsmux_protocol::json::to_payload(value)?;
        self.send(name, &payload).await
    }

    /// Sends one message to every socket of this socket's client,
    /// this one included. Returns how many sockets it reached.
    ///
    /// # Errors
    /// [`RouterError::Anonymous`] if this socket has no client identity.
    pub async fn send_to_client(
        &self,
        name: &str,
        payload: &[u8],
    ) -> Result<usize, RouterError> {
        let client = self.client_id().ok_or(RouterError::Anonymous(self.id()))?;
        self.inner
            .subprotocol
            .send_to_client(client.as_str(), name, payload)
            .await
    }

    /// Adds this socket's client to `room`.
    ///
    /// See [`Subprotocol::join_room`].
    pub fn join(&self, room: &str) -> Result<(), RouterError> {
        self.inner.subprotocol.join_room(room, self)
    }

    /// Removes this socket's client from `room`.
    pub fn leave(&self, room: &str) {
        self.inner.subprotocol.leave_room(room, self);
    }

    /// Tears the socket down: unregisters it everywhere and stops both
    /// pumps. The write pump sends a close frame on its way out.
    ///
    /// Safe to call any number of times, from anywhere.
    pub fn close(&self) {
        if self.inner.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.subprotocol.unregister(self);
        self.inner.shutdown.send_replace(true);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Puts a frame on the outbound queue, waiting for room.
    ///
    /// A full queue that stays full past the send timeout marks the socket
    /// as a slow consumer: the frame is dropped and the socket closed.
    pub(crate) async fn enqueue(&self, frame: Frame) -> Result<(), RouterError> {
        let id = self.id();
        if self.is_closed() {
            return Err(RouterError::SocketClosed(id));
        }

        let mut shutdown = self.shutdown_signal();
        let send = async {
            match self.inner.send_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.inner.queue.send(frame)).await {
                        Ok(sent) => sent.map_err(|_| RouterError::SocketClosed(id)),
                        Err(_) => Err(RouterError::SendTimeout(id)),
                    }
                }
                None => self
                    .inner
                    .queue
                    .send(frame)
                    .await
                    .map_err(|_| RouterError::SocketClosed(id)),
            }
        };

        let result = tokio::select! {
            result = send => result,
            _ = wait_closed(&mut shutdown) => Err(RouterError::SocketClosed(id)),
        };

        if let Err(RouterError::SendTimeout(_)) = result {
            warn!(
                socket = %id,
                client = ?self.client_id(),
                timeout = ?self.inner.send_timeout,
                "outbound queue stayed full, closing slow consumer"
            );
            self.close();
        }
        result
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.inner.id)
            .field("client_id", &self.inner.client_id)
            .field("subprotocol", &self.inner.subprotocol.name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Waits until the shutdown flag is set, or its sender is gone.
pub(crate) async fn wait_closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}
