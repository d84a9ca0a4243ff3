//! Decoder configuration

use crate::multipart::reader::{DEFAULT_MAX_HEADER_SIZE, DEFAULT_MAX_PART_SIZE};

/// Limits applied while reading an inbound multipart stream
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Largest accepted part body in bytes
    pub max_part_size: usize,

    /// Largest accepted part header block in bytes
    pub max_header_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_part_size: DEFAULT_MAX_PART_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }
}

impl DecoderConfig {
    /// Set the maximum part body size
    pub fn max_part_size(mut self, size: usize) -> Self {
        self.max_part_size = size;
        self
    }

    /// Set the maximum header block size
    pub fn max_header_size(mut self, size: usize) -> Self {
        self.max_header_size = size;
        self
    }
}
