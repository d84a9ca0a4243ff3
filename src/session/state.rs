//! Session state machine
//!
//! Tracks one viewer's session from attach to teardown:
//!
//! ```text
//! Starting ──► Streaming ──┬──► IdleTimeout ──┐
//!     │                    ├──► Error ────────┼──► Terminated
//!     └────────────────────┴──► Closed ───────┘
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Attached, envelope not yet written
    Starting,
    /// Envelope written, forwarding frames
    Streaming,
    /// No frame delivered within the idle timeout
    IdleTimeout,
    /// Sink write or envelope failure
    Error,
    /// Broadcaster closed or subscription detached
    Closed,
    /// Resources released
    Terminated,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// No frame delivered within the idle timeout
    IdleTimeout,
    /// The sink failed to accept the envelope or a frame
    SinkError,
    /// The broadcaster closed
    Closed,
}

impl SessionOutcome {
    fn phase(self) -> SessionPhase {
        match self {
            SessionOutcome::IdleTimeout => SessionPhase::IdleTimeout,
            SessionOutcome::SinkError => SessionPhase::Error,
            SessionOutcome::Closed => SessionPhase::Closed,
        }
    }
}

impl std::fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionOutcome::IdleTimeout => write!(f, "idle timeout"),
            SessionOutcome::SinkError => write!(f, "sink error"),
            SessionOutcome::Closed => write!(f, "stream closed"),
        }
    }
}

/// Complete session state
#[derive(Debug)]
pub struct SessionState {
    /// Session id (the subscriber id)
    pub id: u64,

    /// Current phase
    pub phase: SessionPhase,

    /// Monotonic start time
    pub started_at: Instant,

    /// Unix seconds at start, sent as `X-StartTime`
    pub start_unix: u64,

    /// Last successful delivery (or start, before the first frame)
    pub last_frame_at: Instant,

    /// Frames written to the sink
    pub frames_sent: u64,

    /// Payload bytes written to the sink
    pub bytes_sent: u64,

    /// Set once the session leaves `Streaming`
    pub outcome: Option<SessionOutcome>,
}

impl SessionState {
    /// Create a new session state
    pub fn new(id: u64) -> Self {
        let now = Instant::now();
        Self {
            id,
            phase: SessionPhase::Starting,
            started_at: now,
            start_unix: unix_now(),
            last_frame_at: now,
            frames_sent: 0,
            bytes_sent: 0,
            outcome: None,
        }
    }

    /// Envelope written; start the idle clock
    pub fn start_streaming(&mut self) {
        if self.phase == SessionPhase::Starting {
            self.phase = SessionPhase::Streaming;
            self.last_frame_at = Instant::now();
        }
    }

    /// Record a delivered frame and reset the idle clock
    pub fn on_frame(&mut self, size: usize) {
        self.frames_sent += 1;
        self.bytes_sent += size as u64;
        self.last_frame_at = Instant::now();
    }

    /// Time since the last delivered frame
    pub fn idle_for(&self) -> Duration {
        self.last_frame_at.elapsed()
    }

    /// Leave the active phases
    pub fn fail(&mut self, outcome: SessionOutcome) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
            self.phase = outcome.phase();
        }
    }

    /// Resources released
    pub fn terminate(&mut self) {
        self.phase = SessionPhase::Terminated;
    }

    /// Get session duration
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Current wall clock time in unix seconds
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
