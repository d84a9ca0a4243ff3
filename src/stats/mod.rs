//! Statistics for broadcasters, streaming sessions and the server

pub mod metrics;

pub use metrics::{ServerStats, SessionStats, StreamStats};
