//! JPEG validation and decoding
//!
//! Pixel decoding is delegated to the `image` crate. Before that, the
//! marker structure is walked so that truncated or non-JPEG payloads are
//! rejected with a precise reason:
//!
//! ```text
//! FFD8 (SOI) ─ segments (APPn, DQT, DHT, SOFn, ...) ─ FFDA (SOS) + scan ─ ... ─ FFD9 (EOI)
//! ```

use image::{DynamicImage, ImageFormat};

use crate::error::{Error, Result};

/// JPEG marker codes
mod markers {
    pub const TEM: u8 = 0x01;
    pub const SOF0: u8 = 0xC0;
    pub const SOF2: u8 = 0xC2;
    pub const SOF6: u8 = 0xC6;
    pub const SOF10: u8 = 0xCA;
    pub const SOF14: u8 = 0xCE;
    pub const SOF15: u8 = 0xCF;
    pub const DHT: u8 = 0xC4;
    pub const JPG: u8 = 0xC8;
    pub const DAC: u8 = 0xCC;
    pub const RST0: u8 = 0xD0;
    pub const RST7: u8 = 0xD7;
    pub const SOI: u8 = 0xD8;
    pub const EOI: u8 = 0xD9;
    pub const SOS: u8 = 0xDA;
}

/// Frame parameters read from the SOFn segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JpegInfo {
    /// Width in pixels
    pub width: u16,
    /// Height in pixels
    pub height: u16,
    /// Number of color components (1 = grayscale, 3 = YCbCr)
    pub components: u8,
    /// Whether the image uses progressive encoding (SOF2, SOF6, SOF10, SOF14)
    pub progressive: bool,
}

fn invalid(reason: &str) -> Error {
    Error::Decode(reason.to_string())
}

/// Walk the marker structure of a JPEG image
///
/// Fails with `Error::Decode` unless the data starts with SOI, carries a
/// frame header before its first scan, and reaches EOI.
pub fn probe(data: &[u8]) -> Result<JpegInfo> {
    if data.len() < 4 {
        return Err(invalid("too short for a JPEG image"));
    }
    if data[0] != 0xFF || data[1] != markers::SOI {
        return Err(invalid("missing SOI marker"));
    }

    let mut info: Option<JpegInfo> = None;
    let mut pos = 2;

    loop {
        // Skip fill bytes before the marker
        while pos < data.len() && data[pos] == 0xFF && data.get(pos + 1) == Some(&0xFF) {
            pos += 1;
        }
        if pos + 1 >= data.len() {
            return Err(invalid("missing EOI marker (truncated image)"));
        }
        if data[pos] != 0xFF {
            return Err(invalid("expected marker"));
        }

        let marker = data[pos + 1];
        pos += 2;

        match marker {
            markers::EOI => {
                return info.ok_or_else(|| invalid("no frame header before EOI"));
            }
            markers::TEM | markers::SOI | markers::RST0..=markers::RST7 => continue,
            _ => {}
        }

        if pos + 2 > data.len() {
            return Err(invalid("missing EOI marker (truncated image)"));
        }
        let length = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
        if length < 2 {
            return Err(invalid("invalid segment length"));
        }
        if pos + length > data.len() {
            return Err(invalid("missing EOI marker (truncated image)"));
        }
        let segment = &data[pos + 2..pos + length];

        match marker {
            markers::SOF0..=markers::SOF15
                if marker != markers::DHT && marker != markers::JPG && marker != markers::DAC =>
            {
                if segment.len() < 6 {
                    return Err(invalid("frame header too short"));
                }
                let height = u16::from_be_bytes([segment[1], segment[2]]);
                let width = u16::from_be_bytes([segment[3], segment[4]]);
                if width == 0 || height == 0 {
                    return Err(invalid("zero image dimension"));
                }
                info = Some(JpegInfo {
                    width,
                    height,
                    components: segment[5],
                    progressive: matches!(
                        marker,
                        markers::SOF2 | markers::SOF6 | markers::SOF10 | markers::SOF14
                    ),
                });
                pos += length;
            }
            markers::SOS => {
                if info.is_none() {
                    return Err(invalid("scan before frame header"));
                }
                pos = skip_entropy_data(data, pos + length)?;
            }
            _ => pos += length,
        }
    }
}

/// Advance past entropy-coded scan data to the next real marker
fn skip_entropy_data(data: &[u8], mut pos: usize) -> Result<usize> {
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            // Stuffed zero, restart marker
            0x00 | markers::RST0..=markers::RST7 => pos += 2,
            // Fill byte
            0xFF => pos += 1,
            _ => return Ok(pos),
        }
    }
    Err(invalid("missing EOI marker (truncated image)"))
}

/// Decode a JPEG payload into an image
pub fn decode(data: &[u8]) -> Result<DynamicImage> {
    probe(data)?;
    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map_err(|e| Error::Decode(e.to_string()))
}
