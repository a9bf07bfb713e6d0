//! Client identity.
//!
//! A client is an application-level identity (a user, a device) that may
//! own several sockets at once. The identity is resolved once, from the
//! upgrade request, when the socket opens. Sockets without one are
//! anonymous: they can be reached directly and by broadcast, but never by
//! client or room fanout.

use std::{borrow::Borrow, fmt};

use serde::{Deserialize, Serialize};
use wsmux_transport::RequestContext;

/// A non-empty client identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Returns `None` for the empty string, which means "anonymous".
    pub fn new(id: impl Into<String>) -> Option<Self> {
        let id = id.into();
        (!id.is_empty()).then_some(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ClientId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ClientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives the client identity of a new socket from its upgrade request.
///
/// Implemented for plain closures, so the common case is a one-liner:
///
/// ```rust
/// use wsmux_router::{ClientId, ClientIdResolver};
/// use wsmux_transport::RequestContext;
///
/// let resolver = |req: &RequestContext| {
///     req.header("x-user").and_then(|user| ClientId::new(user))
/// };
/// let req = RequestContext::new("/").with_header("X-User", "alice");
/// assert_eq!(resolver.resolve(&req).unwrap().as_str(), "alice");
/// ```
pub trait ClientIdResolver: Send + Sync + 'static {
    /// Returns `None` to open the socket anonymously.
    fn resolve(&self, request: &RequestContext) -> Option<ClientId>;
}

impl<F> ClientIdResolver for F
where
    F: Fn(&RequestContext) -> Option<ClientId> + Send + Sync + 'static,
{
    fn resolve(&self, request: &RequestContext) -> Option<ClientId> {
        self(request)
    }
}

/// Reads the identity from a query-string parameter, e.g. `?client=alice`.
#[derive(Debug, Clone)]
pub struct FromQuery(pub String);

impl ClientIdResolver for FromQuery {
    fn resolve(&self, request: &RequestContext) -> Option<ClientId> {
        request.query_param(&self.0).and_then(ClientId::new)
    }
}

/// Reads the identity from a request header (case-insensitive).
#[derive(Debug, Clone)]
pub struct FromHeader(pub String);

impl ClientIdResolver for FromHeader {
    fn resolve(&self, request: &RequestContext) -> Option<ClientId> {
        request.header(&self.0).and_then(ClientId::new)
    }
}
