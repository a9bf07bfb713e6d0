//! Transport configuration.

use std::time::Duration;

/// Configuration shared by transport implementations.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Sub-protocol names the server is willing to negotiate, in order of
    /// preference. Empty means no `Sec-WebSocket-Protocol` is ever selected.
    pub subprotocols: Vec<String>,

    /// Largest frame accepted from a peer, in bytes.
    ///
    /// Default: 512. Frames above the limit are a protocol violation.
    pub max_frame_size: usize,

    /// How long the upgrade handshake may take before the connection is
    /// dropped.
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            subprotocols: Vec::new(),
            max_frame_size: 512,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    /// Picks the sub-protocol to use from a client's
    /// `Sec-WebSocket-Protocol` offer.
    ///
    /// The first client-offered name the server supports wins.
    pub fn negotiate<'a>(&self, offered: &'a str) -> Option<&'a str> {
        offered
            .split(',')
            .map(str::trim)
            .find(|name| self.subprotocols.iter().any(|s| s == name))
    }
}
