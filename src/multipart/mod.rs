//! Multipart wire codec for `multipart/x-mixed-replace`
//!
//! A live MJPEG response is one long multipart body. Each JPEG frame is a
//! part, delimited by a line holding the boundary token:
//!
//! ```text
//! --<boundary>\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 12345\r\n
//! X-StartTime: 1700000000\r\n
//! X-TimeStamp: 1700000042\r\n
//! \r\n
//! <12345 bytes of JPEG>
//! \r\n--<boundary>\r\n
//! ...
//! \r\n--<boundary>--\r\n
//! ```
//!
//! - [`MultipartWriter`] produces part heads and the closing delimiter
//! - [`PartReader`] walks an inbound byte stream one part at a time
//!
//! Reference: RFC 2046 Section 5.1

pub mod reader;
pub mod writer;

use rand::RngCore;

use crate::error::{Error, Result};

pub use reader::{Part, PartReader};
pub use writer::{FrameHeaders, MultipartWriter};

/// Media type of the live stream envelope
pub const MIXED_REPLACE: &str = "multipart/x-mixed-replace";

/// Media type of each part's payload
pub const IMAGE_JPEG: &str = "image/jpeg";

/// Maximum boundary length allowed by RFC 2046
pub const MAX_BOUNDARY_LEN: usize = 70;

/// Generate a random boundary token (60 hex characters)
pub fn generate_boundary() -> String {
    let mut raw = [0u8; 30];
    rand::thread_rng().fill_bytes(&mut raw);

    let mut boundary = String::with_capacity(raw.len() * 2);
    for byte in raw {
        boundary.push_str(&format!("{:02x}", byte));
    }
    boundary
}

/// Check a boundary token against the RFC 2046 `boundary` grammar
///
/// 1 to 70 characters from the `bchars` set; a space may not be last.
pub fn validate_boundary(boundary: &str) -> Result<()> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(Error::InvalidBoundary(boundary.to_string()));
    }

    let valid = boundary.bytes().all(|b| {
        b.is_ascii_alphanumeric()
            || matches!(
                b,
                b'\'' | b'(' | b')' | b'+' | b'_' | b',' | b'-' | b'.' | b'/' | b':' | b'=' | b'?' | b' '
            )
    });

    if !valid || boundary.ends_with(' ') {
        return Err(Error::InvalidBoundary(boundary.to_string()));
    }

    Ok(())
}

/// Extract the boundary token from a `Content-Type` header value
///
/// Quoted values may contain `;` and backslash escapes. Leading and trailing
/// dashes are trimmed, since some cameras advertise the delimiter
/// (`--token`) instead of the token itself.
pub fn boundary_from_content_type(content_type: &str) -> Result<String> {
    let mut params = split_params(content_type).into_iter();

    let media_type = params.next().map(str::trim).unwrap_or_default();
    if media_type.is_empty() || !media_type.contains('/') {
        return Err(Error::InvalidContentType(content_type.to_string()));
    }

    for param in params {
        let Some((name, value)) = param.split_once('=') else {
            continue;
        };
        if !name.trim().eq_ignore_ascii_case("boundary") {
            continue;
        }

        let value = unquote(value.trim());
        let token = value.trim_matches('-');

        if token.is_empty() || token.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(Error::InvalidBoundary(value));
        }
        return Ok(token.to_string());
    }

    Err(Error::InvalidContentType(format!(
        "{}: missing boundary parameter",
        content_type
    )))
}

/// Split a header value on `;` outside quoted strings
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

/// Strip surrounding quotes and resolve backslash escapes
fn unquote(value: &str) -> String {
    let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) else {
        return value.to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_boundary() {
        let a = generate_boundary();
        let b = generate_boundary();

        assert_eq!(a.len(), 60);
        assert!(a.bytes().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert!(validate_boundary(&a).is_ok());
    }

    #[test]
    fn test_validate_boundary() {
        assert!(validate_boundary("frame").is_ok());
        assert!(validate_boundary("my boundary.1").is_ok());

        assert!(validate_boundary("").is_err());
        assert!(validate_boundary("trailing ").is_err());
        assert!(validate_boundary("bad\r\nboundary").is_err());
        assert!(validate_boundary(&"x".repeat(71)).is_err());
    }

    #[test]
    fn test_boundary_from_content_type() {
        let boundary =
            boundary_from_content_type("multipart/x-mixed-replace; boundary=abc123").unwrap();
        assert_eq!(boundary, "abc123");
    }

    #[test]
    fn test_boundary_dashes_trimmed() {
        let boundary =
            boundary_from_content_type("multipart/x-mixed-replace;boundary=--myboundary").unwrap();
        assert_eq!(boundary, "myboundary");
    }

    #[test]
    fn test_boundary_quoted_and_case_insensitive() {
        let boundary =
            boundary_from_content_type("multipart/x-mixed-replace; charset=utf-8; BOUNDARY=\"--ipcam\"")
                .unwrap();
        assert_eq!(boundary, "ipcam");
    }

    #[test]
    fn test_boundary_quoted_with_separator() {
        let boundary =
            boundary_from_content_type("multipart/x-mixed-replace; boundary=\"a;b\"; charset=x")
                .unwrap();
        assert_eq!(boundary, "a;b");

        let boundary =
            boundary_from_content_type("multipart/x-mixed-replace; boundary=\"cam\\\"era\"").unwrap();
        assert_eq!(boundary, "cam\"era");
    }

    #[test]
    fn test_split_params() {
        assert_eq!(split_params("a; b=1"), vec!["a", " b=1"]);
        assert_eq!(split_params("a; b=\"x;y\"; c"), vec!["a", " b=\"x;y\"", " c"]);
        assert_eq!(split_params("a; b=\"x\\\";y\""), vec!["a", " b=\"x\\\";y\""]);
    }

    #[test]
    fn test_boundary_missing() {
        assert!(matches!(
            boundary_from_content_type("multipart/x-mixed-replace"),
            Err(Error::InvalidContentType(_))
        ));
        assert!(matches!(
            boundary_from_content_type(""),
            Err(Error::InvalidContentType(_))
        ));
        assert!(matches!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=----"),
            Err(Error::InvalidBoundary(_))
        ));
    }
}
