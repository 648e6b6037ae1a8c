//! Timeout configuration for outbound SMTP sessions.
//!
//! Every suspension point of a session is bounded: socket establishment by
//! [`ClientTimeouts::connect`], each individual reply read and command write by
//! [`ClientTimeouts::command`], the message body stream and its final reply by
//! [`ClientTimeouts::data`], and the best-effort `QUIT` by
//! [`ClientTimeouts::quit`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client-side SMTP timeout configuration, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientTimeouts {
    /// Timeout for establishing the TCP connection (and implicit TLS handshake).
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::connect_ms")]
    pub connect_ms: u64,

    /// Timeout for each command write and each reply read.
    ///
    /// Default: 30 seconds
    #[serde(default = "defaults::command_ms")]
    pub command_ms: u64,

    /// Timeout for streaming the message body and reading the final reply.
    ///
    /// Default: 120 seconds
    #[serde(default = "defaults::data_ms")]
    pub data_ms: u64,

    /// Timeout for QUIT. Expiry never fails a delivery.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::quit_ms")]
    pub quit_ms: u64,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect_ms: defaults::connect_ms(),
            command_ms: defaults::command_ms(),
            data_ms: defaults::data_ms(),
            quit_ms: defaults::quit_ms(),
        }
    }
}

impl ClientTimeouts {
    /// Use the same bound for every operation. Mostly useful in tests.
    #[must_use]
    pub fn uniform(timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        Self {
            connect_ms: ms,
            command_ms: ms,
            data_ms: ms,
            quit_ms: ms,
        }
    }

    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_millis(self.command_ms)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_millis(self.data_ms)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_millis(self.quit_ms)
    }
}

mod defaults {
    pub const fn connect_ms() -> u64 {
        30_000
    }
    pub const fn command_ms() -> u64 {
        30_000
    }
    pub const fn data_ms() -> u64 {
        120_000 // 2 minutes
    }
    pub const fn quit_ms() -> u64 {
        10_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_timeouts_defaults() {
        let timeouts = ClientTimeouts::default();
        assert_eq!(timeouts.connect(), Duration::from_secs(30));
        assert_eq!(timeouts.command(), Duration::from_secs(30));
        assert_eq!(timeouts.data(), Duration::from_secs(120));
        assert_eq!(timeouts.quit(), Duration::from_secs(10));
    }

    #[test]
    fn test_uniform() {
        let timeouts = ClientTimeouts::uniform(Duration::from_millis(250));
        assert_eq!(timeouts.connect(), Duration::from_millis(250));
        assert_eq!(timeouts.quit(), Duration::from_millis(250));
    }

    #[test]
    fn test_partial_deserialize_uses_defaults() {
        let timeouts: ClientTimeouts = ron::from_str("(connect_ms: 500)").unwrap();
        assert_eq!(timeouts.connect(), Duration::from_millis(500));
        assert_eq!(timeouts.data(), Duration::from_secs(120));
    }
}
