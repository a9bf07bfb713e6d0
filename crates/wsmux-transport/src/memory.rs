//! In-process transport over tokio channels.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the [`MemoryPeer`]
//! that plays the remote client. The peer observes every frame the server
//! writes, control frames included, which makes keepalive and ordering
//! behaviour testable without sockets. [`listener`] wraps the same thing in a
//! [`Transport`] so accept loops can be driven too.

use tokio::sync::mpsc;

use crate::{
    Connection, ConnectionId, ConnectionReader, ConnectionWriter, Control,
    Incoming, RequestContext, Transport, TransportConfig, TransportError,
};

/// Outgoing buffer used by [`pair`].
const DEFAULT_PEER_BUFFER: usize = 64;

/// A frame written by the server, as seen by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    Frame(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// A frame written by the peer, as seen by the server.
#[derive(Debug)]
enum PeerFrame {
    Data(Vec<u8>),
    Ping,
    Pong,
    Close,
}

/// Creates a connected server/peer pair.
pub fn pair(
    request: RequestContext,
    max_frame_size: usize,
) -> (MemoryConnection, MemoryPeer) {
    pair_with_buffer(request, max_frame_size, DEFAULT_PEER_BUFFER)
}

/// Like [`pair`], but bounds how many server frames may sit unread at the
/// peer. Once `buffer` frames are pending, server writes wait, which models
/// a stalled client.
pub fn pair_with_buffer(
    request: RequestContext,
    max_frame_size: usize,
    buffer: usize,
) -> (MemoryConnection, MemoryPeer) {
    let id = ConnectionId::next();
    let (to_server, from_peer) = mpsc::unbounded_channel();
    let (to_peer, from_server) = mpsc::channel(buffer.max(1));

    let conn = MemoryConnection {
        id,
        request,
        max_frame_size,
        from_peer,
        to_peer,
    };
    let peer = MemoryPeer {
        id,
        to_server,
        from_server,
    };
    (conn, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    id: ConnectionId,
    request: RequestContext,
    max_frame_size: usize,
    from_peer: mpsc::UnboundedReceiver<PeerFrame>,
    to_peer: mpsc::Sender<Outgoing>,
}

impl Connection for MemoryConnection {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn request(&self) -> &RequestContext {
        &self.request
    }

    fn into_split(self) -> (MemoryReader, MemoryWriter) {
        (
            MemoryReader {
                max_frame_size: self.max_frame_size,
                rx: self.from_peer,
                pong: self.to_peer.downgrade(),
            },
            MemoryWriter {
                tx: self.to_peer,
                closed: false,
            },
        )
    }
}

/// Read half of a [`MemoryConnection`].
///
/// Answers pings with a pong on the peer's channel, as a WebSocket stack
/// does. The weak handle lets the peer still observe the writer going away.
pub struct MemoryReader {
    max_frame_size: usize,
    rx: mpsc::UnboundedReceiver<PeerFrame>,
    pong: mpsc::WeakSender<Outgoing>,
}

impl ConnectionReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.rx.recv().await {
            Some(PeerFrame::Data(data)) if data.len() > self.max_frame_size => {
                Err(TransportError::FrameTooLarge {
                    size: data.len(),
                    max: self.max_frame_size,
                })
            }
            Some(PeerFrame::Data(data)) => Ok(Some(Incoming::Data(data))),
            Some(PeerFrame::Ping) => {
                // A full buffer drops the pong; the peer is stalled anyway.
                if let Some(tx) = self.pong.upgrade() {
                    let _ = tx.try_send(Outgoing::Pong);
                }
                Ok(Some(Incoming::Ping))
            }
            Some(PeerFrame::Pong) => Ok(Some(Incoming::Pong)),
            Some(PeerFrame::Close) => Ok(None),
            None => Err(TransportError::ConnectionClosed(
                "peer dropped without closing".into(),
            )),
        }
    }
}

/// Write half of a [`MemoryConnection`].
pub struct MemoryWriter {
    tx: mpsc::Sender<Outgoing>,
    closed: bool,
}

impl MemoryWriter {
    async fn push(&mut self, out: Outgoing) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed(
                "writer already closed".into(),
            ));
        }
        self.tx.send(out).await.map_err(|_| {
            TransportError::ConnectionClosed("peer is gone".into())
        })
    }
}

impl ConnectionWriter for MemoryWriter {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.push(Outgoing::Frame(frame.to_vec())).await
    }

    async fn send_control(
        &mut self,
        control: Control,
    ) -> Result<(), TransportError> {
        let out = match control {
            Control::Ping => Outgoing::Ping,
            Control::Pong => Outgoing::Pong,
            Control::Close => Outgoing::Close,
        };
        self.push(out).await
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closed = true;
        Ok(())
    }
}

/// The remote end of an in-memory connection.
pub struct MemoryPeer {
    id: ConnectionId,
    to_server: mpsc::UnboundedSender<PeerFrame>,
    from_server: mpsc::Receiver<Outgoing>,
}

impl MemoryPeer {
    /// The id of the server-side connection this peer talks to.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Sends a data frame to the server.
    pub fn send(&self, data: impl Into<Vec<u8>>) -> Result<(), TransportError> {
        self.push(PeerFrame::Data(data.into()))
    }

    pub fn ping(&self) -> Result<(), TransportError> {
        self.push(PeerFrame::Ping)
    }

    pub fn pong(&self) -> Result<(), TransportError> {
        self.push(PeerFrame::Pong)
    }

    /// Sends a close frame. The server's reader reports a clean close.
    pub fn close(&self) -> Result<(), TransportError> {
        self.push(PeerFrame::Close)
    }

    fn push(&self, frame: PeerFrame) -> Result<(), TransportError> {
        self.to_server.send(frame).map_err(|_| {
            TransportError::ConnectionClosed("server side is gone".into())
        })
    }

    /// Receives the next thing the server wrote, control frames included.
    ///
    /// Returns `None` once the server dropped its write half.
    pub async fn recv(&mut self) -> Option<Outgoing> {
        self.from_server.recv().await
    }

    /// Receives the next data frame, skipping control frames.
    ///
    /// Returns `None` on a close frame or once the server is gone.
    pub async fn recv_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.from_server.recv().await? {
                Outgoing::Frame(data) => return Some(data),
                Outgoing::Close => return None,
                Outgoing::Ping | Outgoing::Pong => continue,
            }
        }
    }

    /// Returns whatever the server wrote without waiting.
    pub fn try_recv(&mut self) -> Option<Outgoing> {
        self.from_server.try_recv().ok()
    }
}

/// Creates an in-memory [`Transport`] and the connector that feeds it.
pub fn listener(config: TransportConfig) -> (MemoryTransport, MemoryConnector) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryTransport { rx, shut_down: false },
        MemoryConnector { tx, config },
    )
}

/// Dials a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryConnector {
    tx: mpsc::UnboundedSender<MemoryConnection>,
    config: TransportConfig,
}

impl MemoryConnector {
    /// Opens a connection, offering the given sub-protocols.
    ///
    /// Negotiation follows the same rule as the WebSocket transport.
    pub fn connect(
        &self,
        offered: &[&str],
        mut request: RequestContext,
    ) -> Result<MemoryPeer, TransportError> {
        request.subprotocol = self
            .config
            .negotiate(&offered.join(","))
            .map(str::to_owned);
        let (conn, peer) = pair(request, self.config.max_frame_size);
        self.tx
            .send(conn)
            .map_err(|_| TransportError::Shutdown)?;
        Ok(peer)
    }
}

/// Accepting side of [`listener`].
pub struct MemoryTransport {
    rx: mpsc::UnboundedReceiver<MemoryConnection>,
    shut_down: bool,
}

impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn accept(&mut self) -> Result<MemoryConnection, TransportError> {
        if self.shut_down {
            return Err(TransportError::Shutdown);
        }
        self.rx.recv().await.ok_or(TransportError::Shutdown)
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.shut_down = true;
        self.rx.close();
        Ok(())
    }
}
