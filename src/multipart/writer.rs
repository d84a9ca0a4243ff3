//! Multipart part framing for outbound streams

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::Result;

use super::{generate_boundary, validate_boundary, IMAGE_JPEG, MIXED_REPLACE};

/// Headers carried by each frame part
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeaders {
    /// Payload length in bytes
    pub content_length: usize,
    /// Unix seconds when the viewer's connection started
    pub start_time: u64,
    /// Unix seconds when this frame was delivered
    pub timestamp: u64,
}

impl FrameHeaders {
    pub fn new(content_length: usize, start_time: u64, timestamp: u64) -> Self {
        Self {
            content_length,
            start_time,
            timestamp,
        }
    }
}

/// Writes boundary-delimited parts of a `multipart/x-mixed-replace` body
///
/// The writer only produces delimiters and part heads; payload bytes are
/// written verbatim by the caller right after each head.
#[derive(Debug, Clone)]
pub struct MultipartWriter {
    boundary: String,
    wrote_part: bool,
}

impl MultipartWriter {
    /// Create a writer with a freshly generated random boundary
    pub fn new() -> Self {
        Self {
            boundary: generate_boundary(),
            wrote_part: false,
        }
    }

    /// Create a writer with an explicit boundary token
    pub fn with_boundary(boundary: impl Into<String>) -> Result<Self> {
        let boundary = boundary.into();
        validate_boundary(&boundary)?;
        Ok(Self {
            boundary,
            wrote_part: false,
        })
    }

    /// Boundary token (without the leading dashes)
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// `Content-Type` value for the enclosing response
    pub fn content_type(&self) -> String {
        format!("{}; boundary={}", MIXED_REPLACE, self.boundary)
    }

    /// Append the delimiter and head of a new part to `dst`
    ///
    /// `headers` are written in order with the casing given.
    pub fn write_head(&mut self, headers: &[(&str, &str)], dst: &mut BytesMut) {
        let size: usize = headers.iter().map(|(n, v)| n.len() + v.len() + 4).sum();
        dst.reserve(self.boundary.len() + size + 8);

        if self.wrote_part {
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"--");
        dst.put_slice(self.boundary.as_bytes());
        dst.put_slice(b"\r\n");

        for (name, value) in headers {
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"\r\n");

        self.wrote_part = true;
    }

    /// Build the head of a JPEG frame part
    pub fn frame_head(&mut self, headers: &FrameHeaders) -> Bytes {
        let content_length = headers.content_length.to_string();
        let start_time = headers.start_time.to_string();
        let timestamp = headers.timestamp.to_string();

        let mut dst = BytesMut::new();
        self.write_head(
            &[
                ("Content-Type", IMAGE_JPEG),
                ("Content-Length", content_length.as_str()),
                ("X-StartTime", start_time.as_str()),
                ("X-TimeStamp", timestamp.as_str()),
            ],
            &mut dst,
        );
        dst.freeze()
    }

    /// Closing delimiter that ends the multipart body
    pub fn finish(&self) -> Bytes {
        let mut dst = BytesMut::with_capacity(self.boundary.len() + 8);
        if self.wrote_part {
            dst.put_slice(b"\r\n");
        }
        dst.put_slice(b"--");
        dst.put_slice(self.boundary.as_bytes());
        dst.put_slice(b"--\r\n");
        dst.freeze()
    }
}

impl Default for MultipartWriter {
    fn default() -> Self {
        Self::new()
    }
}
