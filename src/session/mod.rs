//! Streaming sessions
//!
//! One session serves one viewer: it pulls frames from its subscription,
//! wraps them as multipart parts, and writes them to a [`FrameSink`].

pub mod handler;
pub mod sink;
pub mod state;

pub use handler::StreamSession;
pub use sink::{BodySink, FrameSink, HttpSink};
pub use state::{SessionOutcome, SessionPhase, SessionState};
pub use crate::stats::SessionStats;
