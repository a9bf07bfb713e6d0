//! Type-erased inbound handlers.

use std::{future::Future, sync::Arc};

use futures_util::future::BoxFuture;
use wsmux_protocol::MessageKey;

use crate::{HandlerError, Socket};

pub(crate) type HandlerResult = BoxFuture<'static, Result<(), HandlerError>>;

/// Handles one registered inbound message: `(socket, payload)`.
pub(crate) type Handler = Arc<dyn Fn(Socket, Vec<u8>) -> HandlerResult + Send + Sync>;

/// Handles inbound messages with no registered handler:
/// `(socket, key as seen on the wire, payload)`.
pub(crate) type Fallback =
    Arc<dyn Fn(Socket, MessageKey, Vec<u8>) -> HandlerResult + Send + Sync>;

pub(crate) fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Socket, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |socket: Socket, payload: Vec<u8>| -> HandlerResult {
        Box::pin(f(socket, payload))
    })
}

pub(crate) fn fallback<F, Fut>(f: F) -> Fallback
where
    F: Fn(Socket, MessageKey, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(
        move |socket: Socket, key: MessageKey, payload: Vec<u8>| -> HandlerResult {
            Box::pin(f(socket, key, payload))
        },
    )
}
