//! Error types
//!
//! A single error enum covers the broadcaster, the wire codec and the
//! decoder. Sink failures inside a streaming session never surface here;
//! they end that session and are reported through
//! [`SessionOutcome`](crate::session::SessionOutcome).

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for MJPEG operations
#[derive(Debug, Error)]
pub enum Error {
    /// Operation attempted after the broadcaster was closed
    #[error("stream was closed")]
    StreamClosed,

    /// The multipart sequence is exhausted
    #[error("end of stream")]
    EndOfStream,

    /// The next part could not be parsed
    #[error("malformed part: {0}")]
    MalformedPart(String),

    /// The part parsed but its payload is not a valid JPEG image
    #[error("decode error: {0}")]
    Decode(String),

    /// Content-Type is missing, not parseable, or has no boundary parameter
    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    /// Boundary token is empty or contains characters not allowed by RFC 2046
    #[error("invalid boundary: {0:?}")]
    InvalidBoundary(String),

    /// I/O error on the underlying stream or sink
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error while opening a remote stream
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Whether this error marks the normal end of a multipart sequence
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }
}
