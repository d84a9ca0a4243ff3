//! Broadcaster configuration

use std::time::Duration;

/// Default interval between mailbox polls in a streaming session
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Smallest poll interval a session will use
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Default time a session may go without a frame before it is reaped
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration shared by a broadcaster and the sessions attached to it
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// How often a session checks its mailbox for a new frame
    ///
    /// Lower values reduce latency at the cost of CPU wakeups.
    pub poll_interval: Duration,

    /// Session is terminated after this long without delivering a frame
    pub idle_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl StreamConfig {
    /// Create a config with a custom poll interval
    pub fn with_interval(interval: Duration) -> Self {
        Self::default().poll_interval(interval)
    }

    /// Set the poll interval
    ///
    /// A zero interval is raised to one millisecond so sessions never spin.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Set the idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}
