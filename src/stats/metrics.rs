//! Statistics and metrics for MJPEG streaming

use std::time::Duration;

use crate::session::SessionOutcome;

/// Per-session statistics, returned when a streaming session terminates
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Subscriber id of the session
    pub session_id: u64,
    /// Frames written to the sink
    pub frames_sent: u64,
    /// Payload bytes written to the sink (excluding part headers)
    pub bytes_sent: u64,
    /// Time from start to termination
    pub duration: Duration,
    /// Why the session ended (`None` while still running)
    pub outcome: Option<SessionOutcome>,
}

impl SessionStats {
    /// Average delivered frame rate over the session lifetime
    pub fn framerate(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }

    /// Average payload bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_sent * 8) / secs
        } else {
            0
        }
    }
}

/// Broadcaster statistics
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    /// Currently attached subscribers
    pub watchers: usize,
    /// Calls to `update` that were accepted
    pub frames_published: u64,
    /// Frames placed into a subscriber mailbox
    pub frames_delivered: u64,
    /// Frames skipped because a subscriber mailbox was still full
    pub frames_dropped: u64,
    /// Time since the broadcaster was created
    pub uptime: Duration,
    /// Whether the broadcaster has been closed
    pub closed: bool,
}

impl StreamStats {
    /// Fraction of attempted deliveries that were dropped
    pub fn drop_ratio(&self) -> f64 {
        let attempts = self.frames_delivered + self.frames_dropped;
        if attempts > 0 {
            self.frames_dropped as f64 / attempts as f64
        } else {
            0.0
        }
    }

    /// Producer frame rate over the broadcaster lifetime
    pub fn publish_rate(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.frames_published as f64 / secs
        } else {
            0.0
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    /// Requests received on the stream and snapshot routes
    pub total_connections: u64,
    /// Requests being served; a live viewer counts until its session ends
    pub active_connections: u64,
    /// Requests turned away by the limit
    pub rejected_connections: u64,
    /// Uptime
    pub uptime: Duration,
}
