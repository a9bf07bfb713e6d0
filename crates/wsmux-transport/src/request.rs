//! The context of the HTTP request that was upgraded into a connection.

use std::net::SocketAddr;

/// What the upgrade handshake knew about the client.
///
/// Handed to client-identity resolvers so they can read cookies, headers, or
/// query parameters. Header names are stored lower-cased.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// The sub-protocol both sides agreed on, if any.
    pub subprotocol: Option<String>,
    /// Request path, e.g. `/ws`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    /// Request headers as `(lower-cased name, value)` pairs.
    pub headers: Vec<(String, String)>,
    /// Address of the remote peer, when known.
    pub remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    /// Creates an empty context for the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Sets the negotiated sub-protocol.
    pub fn with_subprotocol(mut self, name: impl Into<String>) -> Self {
        self.subprotocol = Some(name.into());
        self
    }

    /// Sets the raw query string.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Adds a header.
    pub fn with_header(
        mut self,
        name: impl AsRef<str>,
        value: impl Into<String>,
    ) -> Self {
        self.headers
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
        self
    }

    /// Returns the first value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the first value of a query parameter, percent-decoded.
    ///
    /// `+` decodes to a space, as in HTML form encoding. A key without `=`
    /// yields an empty value.
    pub fn query_param(&self, key: &str) -> Option<String> {
        let pairs: Vec<(String, String)> =
            serde_urlencoded::from_str(self.query.as_deref()?).ok()?;
        pairs.into_iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}
