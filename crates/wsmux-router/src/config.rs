//! Per-socket timing and queueing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Shortest `pong_wait` a socket accepts.
pub const MIN_PONG_WAIT: Duration = Duration::from_millis(10);

/// Shortest `ping_period` a socket accepts.
pub const MIN_PING_PERIOD: Duration = Duration::from_millis(1);

/// Longest wait of any kind. Deadlines are computed as `now + wait`.
pub const MAX_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// 9/10 of `pong_wait`, computed without overflow.
fn ping_period_for(pong_wait: Duration) -> Duration {
    (pong_wait / 10 * 9).max(MIN_PING_PERIOD)
}

/// Configuration applied to every socket a [`Subprotocol`] opens.
///
/// The defaults match a short-message control protocol: a peer that stays
/// silent for a minute (no pong to our pings) is considered dead.
///
/// [`Subprotocol`]: crate::Subprotocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    /// Time allowed to write one frame to the peer.
    pub write_wait: Duration,

    /// Time allowed to read the next pong from the peer.
    pub pong_wait: Duration,

    /// Ping interval. Must be shorter than `pong_wait`.
    pub ping_period: Duration,

    /// Outbound frames that may wait for the write pump.
    ///
    /// Default: 1, i.e. one frame in flight; senders wait for the pump.
    pub send_queue_capacity: usize,

    /// How long a sender waits for room in the outbound queue.
    ///
    /// `None` waits indefinitely. With a limit, a socket that does not
    /// drain in time is torn down and the send reports
    /// [`RouterError::SendTimeout`](crate::RouterError::SendTimeout).
    pub send_timeout: Option<Duration>,
}

impl Default for SocketConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: ping_period_for(pong_wait),
            send_queue_capacity: 1,
            send_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl SocketConfig {
    /// Creates a config for the given pong wait, pinging at 9/10 of it.
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_period: ping_period_for(pong_wait),
            ..Self::default()
        }
    }

    /// Clamp and fix any out-of-range values so the config is safe to use.
    ///
    /// Called automatically when a socket is opened. Rules:
    /// - zero `pong_wait` or `write_wait` fall back to their defaults.
    /// - `pong_wait` is raised to [`MIN_PONG_WAIT`]; every wait is capped at
    ///   [`MAX_WAIT`].
    /// - `ping_period` is forced below `pong_wait` (9/10 of it), otherwise
    ///   a healthy peer would time out between pings. It never drops below
    ///   [`MIN_PING_PERIOD`].
    /// - `send_queue_capacity` is at least 1.
    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        if self.pong_wait.is_zero() {
            warn!("pong_wait is zero, using default");
            self.pong_wait = defaults.pong_wait;
        }
        if self.write_wait.is_zero() {
            warn!("write_wait is zero, using default");
            self.write_wait = defaults.write_wait;
        }
        if self.pong_wait < MIN_PONG_WAIT {
            warn!(pong_wait = ?self.pong_wait, min = ?MIN_PONG_WAIT, "pong_wait too short, raising");
            self.pong_wait = MIN_PONG_WAIT;
        }
        self.pong_wait = cap("pong_wait", self.pong_wait);
        self.write_wait = cap("write_wait", self.write_wait);
        self.send_timeout = self.send_timeout.map(|wait| cap("send_timeout", wait));

        if self.ping_period < MIN_PING_PERIOD || self.ping_period >= self.pong_wait {
            let fixed = ping_period_for(self.pong_wait);
            warn!(
                ping_period = ?self.ping_period,
                pong_wait = ?self.pong_wait,
                ?fixed,
                "ping_period must be shorter than pong_wait, clamping"
            );
            self.ping_period = fixed;
        }
        if self.send_queue_capacity == 0 {
            self.send_queue_capacity = 1;
        }
        self
    }
}

fn cap(field: &'static str, wait: Duration) -> Duration {
    if wait > MAX_WAIT {
        warn!(field, ?wait, max = ?MAX_WAIT, "wait too long, capping");
        return MAX_WAIT;
    }
    wait
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SocketConfig::default();
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.ping_period, Duration::from_secs(54));
        assert_eq!(cfg.send_queue_capacity, 1);
        assert_eq!(cfg.send_timeout, Some(Duration::from_secs(10)));
        assert_eq!(cfg.clone().validated(), cfg);
    }

    #[test]
    fn test_ping_period_clamped_below_pong_wait() {
        let cfg = SocketConfig {
            ping_period: Duration::from_secs(90),
            ..SocketConfig::default()
        }
        .validated();
        assert_eq!(cfg.ping_period, Duration::from_secs(54));
    }

    #[test]
    fn test_zero_values_fixed() {
        let cfg = SocketConfig {
            pong_wait: Duration::ZERO,
            write_wait: Duration::ZERO,
            ping_period: Duration::ZERO,
            send_queue_capacity: 0,
            send_timeout: None,
        }
        .validated();
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
        assert_eq!(cfg.write_wait, Duration::from_secs(10));
        assert_eq!(cfg.ping_period, Duration::from_secs(54));
        assert_eq!(cfg.send_queue_capacity, 1);
        assert_eq!(cfg.send_timeout, None);
    }

    #[test]
    fn test_with_pong_wait() {
        let cfg = SocketConfig::with_pong_wait(Duration::from_secs(10));
        assert_eq!(cfg.ping_period, Duration::from_secs(9));
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let cfg: SocketConfig =
            serde_json::from_str(r#"{"send_queue_capacity": 8}"#).unwrap();
        assert_eq!(cfg.send_queue_capacity, 8);
        assert_eq!(cfg.pong_wait, Duration::from_secs(60));
    }

    #[test]
    fn test_tiny_pong_wait_raised() {
        let cfg = SocketConfig {
            pong_wait: Duration::from_nanos(1),
            ping_period: Duration::from_nanos(1),
            ..SocketConfig::default()
        }
        .validated();
        assert_eq!(cfg.pong_wait, MIN_PONG_WAIT);
        assert_eq!(cfg.ping_period, Duration::from_millis(9));
        assert!(!cfg.ping_period.is_zero());
    }

    #[test]
    fn test_tiny_ping_period_raised() {
        let cfg = SocketConfig {
            ping_period: Duration::from_nanos(1),
            ..SocketConfig::default()
        }
        .validated();
        assert_eq!(cfg.ping_period, Duration::from_secs(54));
    }

    #[test]
    fn test_huge_waits_capped() {
        let cfg = SocketConfig {
            pong_wait: Duration::MAX,
            write_wait: Duration::MAX,
            ping_period: Duration::MAX,
            send_timeout: Some(Duration::MAX),
            ..SocketConfig::default()
        }
        .validated();
        assert_eq!(cfg.pong_wait, MAX_WAIT);
        assert_eq!(cfg.write_wait, MAX_WAIT);
        assert_eq!(cfg.send_timeout, Some(MAX_WAIT));
        assert!(cfg.ping_period < cfg.pong_wait);
        assert!(tokio::time::Instant::now().checked_add(cfg.pong_wait).is_some());
    }

    #[test]
    fn test_with_pong_wait_does_not_overflow() {
        let cfg = SocketConfig::with_pong_wait(Duration::MAX);
        assert!(cfg.ping_period < cfg.pong_wait);
        assert_eq!(cfg.validated().pong_wait, MAX_WAIT);
    }
}
