//! The two tasks that own a connection.
//!
//! ```text
//!           ┌──────────── read pump ────────────┐
//! peer ───► │ recv ─► decode ─► handler (await)  │
//!           └────────────────────────────────────┘
//!           ┌──────────── write pump ───────────┐
//! peer ◄─── │ queue.recv / keepalive ping        │ ◄─── Socket::send,
//!           └────────────────────────────────────┘      fanout
//! ```
//!
//! The read pump runs one handler at a time, so a socket's messages are
//! handled in arrival order. It tolerates silence for at most `pong_wait`;
//! only a pong from the peer extends that deadline.
//!
//! The write pump is the only writer. It drains the outbound queue and
//! pings every `ping_period`, giving each write `write_wait` to complete.
//!
//! Whichever pump stops first tears the socket down; the other sees the
//! shutdown signal and stops too.

use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at, timeout, timeout_at},
};
use tracing::{debug, trace, warn};
use wsmux_transport::{Control, ConnectionReader, ConnectionWriter, Incoming};

use crate::{
    Socket, SocketConfig,
    socket::{Frame, wait_closed},
};

/// Starts both pumps for a freshly registered socket.
pub(crate) fn spawn<R, W>(
    socket: Socket,
    reader: R,
    writer: W,
    queue: mpsc::Receiver<Frame>,
    config: SocketConfig,
) where
    R: ConnectionReader,
    W: ConnectionWriter,
{
    tokio::spawn(write_pump(socket.clone(), writer, queue, config.clone()));
    tokio::spawn(read_pump(socket, reader, config));
}

async fn read_pump<R: ConnectionReader>(socket: Socket, mut reader: R, config: SocketConfig) {
    let id = socket.id();
    let mut shutdown = socket.shutdown_signal();
    let mut deadline = Instant::now() + config.pong_wait;

    loop {
        let received = tokio::select! {
            _ = wait_closed(&mut shutdown) => break,
            received = timeout_at(deadline, reader.recv()) => received,
        };

        match received {
            Ok(Ok(Some(Incoming::Data(frame)))) => {
                // Handlers run inline: the next frame is not read until
                // this one is done.
                if let Err(e) = socket.subprotocol().dispatch(&socket, &frame).await {
                    warn!(socket = %id, error = %e, "malformed frame, closing socket");
                    break;
                }
            }
            Ok(Ok(Some(Incoming::Pong))) => {
                trace!(socket = %id, "pong");
                deadline = Instant::now() + config.pong_wait;
            }
            Ok(Ok(Some(Incoming::Ping))) => {
                trace!(socket = %id, "ping");
            }
            Ok(Ok(None)) => {
                debug!(socket = %id, "peer closed connection");
                break;
            }
            Ok(Err(e)) if e.is_disconnect() => {
                debug!(socket = %id, error = %e, "peer disconnected");
                break;
            }
            Ok(Err(e)) => {
                warn!(socket = %id, error = %e, "read failed, closing socket");
                break;
            }
            Err(_) => {
                debug!(socket = %id, pong_wait = ?config.pong_wait, "read deadline exceeded");
                break;
            }
        }
    }

    socket.close();
}

async fn write_pump<W: ConnectionWriter>(
    socket: Socket,
    mut writer: W,
    mut queue: mpsc::Receiver<Frame>,
    config: SocketConfig,
) {
    let id = socket.id();
    let mut shutdown = socket.shutdown_signal();
    let mut keepalive = interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Queued frames go out before a pending shutdown is noticed.
            biased;

            frame = queue.recv() => {
                let Some(frame) = frame else { break };
                match timeout(config.write_wait, writer.send(&frame)).await {
                    Ok(Ok(())) => trace!(socket = %id, len = frame.len(), "frame written"),
                    Ok(Err(e)) => {
                        debug!(socket = %id, error = %e, "write failed, closing socket");
                        break;
                    }
                    Err(_) => {
                        warn!(socket = %id, write_wait = ?config.write_wait, "write deadline exceeded");
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                match timeout(config.write_wait, writer.send_control(Control::Ping)).await {
                    Ok(Ok(())) => trace!(socket = %id, "ping sent"),
                    Ok(Err(e)) => {
                        debug!(socket = %id, error = %e, "ping failed, closing socket");
                        break;
                    }
                    Err(_) => {
                        debug!(socket = %id, "ping deadline exceeded");
                        break;
                    }
                }
            }
            _ = wait_closed(&mut shutdown) => break,
        }
    }

    // Best effort: the peer may already be gone.
    match timeout(config.write_wait, writer.send_control(Control::Close)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => trace!(socket = %id, error = %e, "close frame not sent"),
        Err(_) => trace!(socket = %id, "close frame timed out"),
    }
    let _ = timeout(config.write_wait, writer.close()).await;

    socket.close();
    debug!(socket = %id, "write pump stopped");
}
