//! MJPEG stream decoder
//!
//! Reads a `multipart/x-mixed-replace` byte stream one part at a time and
//! decodes each part body as a JPEG image.
//!
//! ```no_run
//! use mjpeg_rs::Decoder;
//!
//! # async fn example() -> mjpeg_rs::error::Result<()> {
//! let mut decoder = Decoder::from_url("http://camera.local/mjpeg").await?;
//! loop {
//!     match decoder.decode().await {
//!         Ok(image) => println!("{}x{}", image.width(), image.height()),
//!         Err(e) if e.is_end_of_stream() => break,
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod jpeg;

use image::DynamicImage;
use tokio::io::AsyncRead;

use crate::broadcast::Frame;
use crate::error::Result;
use crate::multipart::{Part, PartReader};

pub use client::ResponseBody;
pub use config::DecoderConfig;
pub use jpeg::JpegInfo;

/// Sequential decoder over one multipart byte stream
///
/// Each call consumes exactly one part. After a `MalformedPart` error the
/// underlying cursor cannot resume, and later calls keep failing.
#[derive(Debug)]
pub struct Decoder<R> {
    parts: PartReader<R>,
}

impl<R: AsyncRead + Unpin> Decoder<R> {
    /// Create a decoder over an open stream with an explicit boundary token
    ///
    /// The token is used as given: the delimiter lines are `--<boundary>`.
    pub fn new(reader: R, boundary: &str) -> Self {
        Self::with_config(reader, boundary, DecoderConfig::default())
    }

    /// Create a decoder with custom limits
    pub fn with_config(reader: R, boundary: &str, config: DecoderConfig) -> Self {
        Self {
            parts: PartReader::new(reader, boundary)
                .limits(config.max_part_size, config.max_header_size),
        }
    }

    /// Boundary token this decoder is bound to
    pub fn boundary(&self) -> &str {
        self.parts.boundary()
    }

    /// Read the next part without decoding it
    pub async fn next_part(&mut self) -> Result<Part> {
        self.parts.next_part().await.map_err(|e| {
            if !e.is_end_of_stream() {
                tracing::warn!(error = %e, "Failed to read multipart part");
            }
            e
        })
    }

    /// Read the next part's raw JPEG bytes
    pub async fn next_frame(&mut self) -> Result<Frame> {
        Ok(self.next_part().await?.into_body())
    }

    /// Read and decode the next JPEG image
    ///
    /// - `Error::EndOfStream`: the multipart sequence is exhausted
    /// - `Error::MalformedPart`: the next part could not be parsed
    /// - `Error::Decode`: the part body is not a valid JPEG image
    pub async fn decode(&mut self) -> Result<DynamicImage> {
        let part = self.next_part().await?;
        jpeg::decode(part.body())
    }
}
