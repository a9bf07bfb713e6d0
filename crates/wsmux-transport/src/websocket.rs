//! WebSocket transport implementation using `tokio-tungstenite`.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::error::CapacityError;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use crate::{
    Connection, ConnectionId, ConnectionReader, ConnectionWriter, Control,
    Incoming, RequestContext, Transport, TransportConfig, TransportError,
};

type WsStream = tokio_tungstenite::WebSocketStream<TcpStream>;

/// A WebSocket-based [`Transport`] that listens for incoming connections.
///
/// Each upgrade handshake runs in its own task, so a client that connects
/// and then stalls never holds up the clients behind it.
pub struct WebSocketTransport {
    listener: TcpListener,
    config: Arc<TransportConfig>,
    handshakes: JoinSet<Result<WebSocketConnection, TransportError>>,
    shut_down: bool,
}

impl WebSocketTransport {
    /// Binds a new WebSocket transport to the given address.
    pub async fn bind(
        addr: &str,
        config: TransportConfig,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(TransportError::AcceptFailed)?;
        tracing::info!(
            addr,
            subprotocols = ?config.subprotocols,
            "WebSocket transport listening"
        );
        Ok(Self {
            listener,
            config: Arc::new(config),
            handshakes: JoinSet::new(),
            shut_down: false,
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

fn ws_config(config: &TransportConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_frame_size);
    ws_config.max_frame_size = Some(config.max_frame_size);
    ws_config
}

async fn upgrade(
    config: Arc<TransportConfig>,
    stream: TcpStream,
    addr: SocketAddr,
) -> Result<WebSocketConnection, TransportError> {
    let config = &*config;
    let mut captured: Option<RequestContext> = None;

    // Runs inside the handshake: records the request and answers the
    // client's Sec-WebSocket-Protocol offer.
    let negotiate = |req: &Request,
                     mut resp: Response|
     -> Result<Response, ErrorResponse> {
        let mut ctx = RequestContext::new(req.uri().path());
        ctx.query = req.uri().query().map(str::to_owned);
        ctx.remote_addr = Some(addr);
        for (name, value) in req.headers() {
            if let Ok(value) = value.to_str() {
                ctx.headers
                    .push((name.as_str().to_owned(), value.to_owned()));
            }
        }

        let offer = req
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok());
        if let Some(chosen) = offer.and_then(|o| config.negotiate(o)) {
            if let Ok(value) = HeaderValue::from_str(chosen) {
                resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                ctx.subprotocol = Some(chosen.to_owned());
            }
        }

        captured = Some(ctx);
        Ok(resp)
    };

    let handshake = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        negotiate,
        Some(ws_config(config)),
    );
    let ws = match tokio::time::timeout(config.handshake_timeout, handshake)
        .await
    {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => return Err(TransportError::Handshake(e.to_string())),
        Err(_) => {
            return Err(TransportError::Handshake(
                "handshake timed out".into(),
            ));
        }
    };

    let request = captured.ok_or_else(|| {
        TransportError::Handshake("request was never observed".into())
    })?;

    let id = ConnectionId::next();
    tracing::debug!(
        %id,
        %addr,
        subprotocol = ?request.subprotocol,
        "accepted WebSocket connection"
    );

    Ok(WebSocketConnection {
        id,
        request,
        max_frame_size: config.max_frame_size,
        ws,
    })
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;

    /// Returns the next connection whose handshake completed, in completion
    /// order. A failed handshake is returned as an error for that
    /// connection only; the listener keeps going.
    async fn accept(&mut self) -> Result<Self::Connection, TransportError> {
        loop {
            if self.shut_down {
                return Err(TransportError::Shutdown);
            }

            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, addr) =
                        accepted.map_err(TransportError::AcceptFailed)?;
                    self.handshakes
                        .spawn(upgrade(Arc::clone(&self.config), stream, addr));
                }
                Some(joined) = self.handshakes.join_next() => match joined {
                    Ok(upgraded) => return upgraded,
                    Err(e) => {
                        tracing::warn!(error = %e, "handshake task failed");
                    }
                },
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), TransportError> {
        self.shut_down = true;
        self.handshakes.abort_all();
        tracing::info!("WebSocket transport shut down");
        Ok(())
    }
}

/// A single upgraded WebSocket connection.
#[derive(Debug)]
pub struct WebSocketConnection {
    id: ConnectionId,
    request: RequestContext,
    max_frame_size: usize,
    ws: WsStream,
}

impl Connection for WebSocketConnection {
    type Reader = WebSocketReader;
    type Writer = WebSocketWriter;

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn request(&self) -> &RequestContext {
        &self.request
    }

    fn into_split(self) -> (WebSocketReader, WebSocketWriter) {
        let (sink, stream) = self.ws.split();
        (
            WebSocketReader {
                id: self.id,
                max_frame_size: self.max_frame_size,
                stream,
            },
            WebSocketWriter { id: self.id, sink },
        )
    }
}

/// Read half of a [`WebSocketConnection`].
pub struct WebSocketReader {
    id: ConnectionId,
    max_frame_size: usize,
    stream: SplitStream<WsStream>,
}

impl ConnectionReader for WebSocketReader {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        loop {
            let data = match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => Vec::from(data),
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Ping(_))) => return Ok(Some(Incoming::Ping)),
                Some(Ok(Message::Pong(_))) => return Ok(Some(Incoming::Pong)),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(Message::Frame(_))) => continue,
                Some(Err(e)) => return Err(map_recv_error(e)),
            };

            // tungstenite already enforces the limit; this catches a
            // transport configured without one.
            if data.len() > self.max_frame_size {
                tracing::debug!(
                    id = %self.id,
                    size = data.len(),
                    "oversized frame"
                );
                return Err(TransportError::FrameTooLarge {
                    size: data.len(),
                    max: self.max_frame_size,
                });
            }
            return Ok(Some(Incoming::Data(data)));
        }
    }
}

fn map_recv_error(e: WsError) -> TransportError {
    match e {
        WsError::Capacity(CapacityError::MessageTooLong { size, max_size }) => {
            TransportError::FrameTooLarge {
                size,
                max: max_size,
            }
        }
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        WsError::Io(io) => TransportError::ReceiveFailed(io),
        other => TransportError::ReceiveFailed(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            other,
        )),
    }
}

fn map_send_error(e: WsError) -> TransportError {
    match e {
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::ConnectionClosed(e.to_string())
        }
        WsError::Io(io) => TransportError::SendFailed(io),
        other => TransportError::SendFailed(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            other,
        )),
    }
}

/// Write half of a [`WebSocketConnection`].
pub struct WebSocketWriter {
    id: ConnectionId,
    sink: SplitSink<WsStream, Message>,
}

impl ConnectionWriter for WebSocketWriter {
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.sink
            .send(Message::Binary(frame.to_vec().into()))
            .await
            .map_err(map_send_error)
    }

    async fn send_control(
        &mut self,
        control: Control,
    ) -> Result<(), TransportError> {
        let msg = match control {
            Control::Ping => Message::Ping(Vec::<u8>::new().into()),
            Control::Pong => Message::Pong(Vec::<u8>::new().into()),
            Control::Close => Message::Close(None),
        };
        self.sink.send(msg).await.map_err(map_send_error)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.sink.close().await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                tracing::trace!(id = %self.id, "WebSocket writer closed");
                Ok(())
            }
            Err(e) => Err(map_send_error(e)),
        }
    }
}
