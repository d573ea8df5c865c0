//! Timeout configuration for the synchronization client.

use std::time::Duration;

/// Timeouts used by the client and the WebSocket transport.
///
/// # Examples
///
/// ```rust
/// use lab_link::LabLinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults suit a dashboard talking to a server on the same network
/// let timeouts = LabLinkTimeouts::default();
///
/// let timeouts = LabLinkTimeouts::builder()
///     .request_timeout(Duration::from_secs(20))
///     .keepalive_interval_secs(0) // no pings
///     .build();
/// assert!(LabLinkTimeouts::is_no_timeout(timeouts.keepalive_interval));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabLinkTimeouts {
    /// Timeout for opening the socket (TCP + TLS + upgrade).
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// How long `get` waits, both for the connection and for the answer.
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Timeout for the authenticate handshake.
    /// Default: 5 seconds
    pub auth_timeout: Duration,

    /// Keep-alive ping interval. Zero disables pings.
    /// Default: 10 seconds
    pub keepalive_interval: Duration,

    /// Maximum silence after a ping before the socket is considered dead.
    /// Zero disables the check.
    /// Default: 5 seconds
    pub pong_timeout: Duration,
}

impl Default for LabLinkTimeouts {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(10),
            pong_timeout: Duration::from_secs(5),
        }
    }
}

impl LabLinkTimeouts {
    pub fn builder() -> LabLinkTimeoutsBuilder {
        LabLinkTimeoutsBuilder::new()
    }

    /// Short timeouts for a server on localhost.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(3),
            auth_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(5),
        }
    }

    /// Long timeouts for remote or flaky networks.
    pub fn relaxed() -> Self {
        Self {
            connection_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
            auth_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }

    /// Tight timeouts for tests, with keep-alive pings disabled.
    pub fn for_testing(request_timeout_ms: u64) -> Self {
        Self {
            connection_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_millis(request_timeout_ms),
            auth_timeout: Duration::from_secs(2),
            keepalive_interval: Duration::ZERO,
            pong_timeout: Duration::ZERO,
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for custom [`LabLinkTimeouts`].
#[derive(Debug, Clone)]
pub struct LabLinkTimeoutsBuilder {
    timeouts: LabLinkTimeouts,
}

impl LabLinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LabLinkTimeouts::default(),
        }
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    pub fn connection_timeout_secs(self, secs: u64) -> Self {
        self.connection_timeout(Duration::from_secs(secs))
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.request_timeout = timeout;
        self
    }

    pub fn request_timeout_secs(self, secs: u64) -> Self {
        self.request_timeout(Duration::from_secs(secs))
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.auth_timeout = timeout;
        self
    }

    pub fn auth_timeout_secs(self, secs: u64) -> Self {
        self.auth_timeout(Duration::from_secs(secs))
    }

    /// Set to 0 to disable keepalive pings.
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.timeouts.keepalive_interval = interval;
        self
    }

    pub fn keepalive_interval_secs(self, secs: u64) -> Self {
        self.keepalive_interval(Duration::from_secs(secs))
    }

    /// Set to 0 to disable pong timeout checking.
    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.pong_timeout = timeout;
        self
    }

    pub fn pong_timeout_secs(self, secs: u64) -> Self {
        self.pong_timeout(Duration::from_secs(secs))
    }

    pub fn build(self) -> LabLinkTimeouts {
        self.timeouts
    }
}
