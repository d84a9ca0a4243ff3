//! Multipart part reader for inbound streams
//!
//! A part with a `Content-Length` header is returned as soon as that many
//! body bytes have arrived; the CRLF and delimiter that follow are consumed
//! on the next call, skipping anything up to the delimiter line. Parts
//! without one are located by scanning for the delimiter (`\n--<boundary>`).
//! A `\r` right before the delimiter belongs to the delimiter, not to the
//! part body.

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderMap;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Default upper bound on one part body
pub const DEFAULT_MAX_PART_SIZE: usize = 16 * 1024 * 1024;

/// Default upper bound on one part's header block
pub const DEFAULT_MAX_HEADER_SIZE: usize = 16 * 1024;

const READ_CHUNK: usize = 16 * 1024;

/// One part of a multipart body
#[derive(Debug, Clone)]
pub struct Part {
    headers: HeaderMap,
    body: Bytes,
}

impl Part {
    /// Part headers (case-insensitive lookup)
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Part body bytes
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Consume the part and return its body
    pub fn into_body(self) -> Bytes {
        self.body
    }

    /// Declared `Content-Type`, if present and valid UTF-8
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)?.to_str().ok()
    }

    /// Declared `Content-Length`, if present and numeric
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get(CONTENT_LENGTH).and_then(parse_length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    /// Skipping lines up to the next delimiter: the preamble, or the tail
    /// after a body read by `Content-Length`
    Preamble,
    /// A delimiter was consumed; the rest of its line is pending
    Delimiter,
    /// Inside a part's header block
    Headers,
    /// Headers parsed; the body is pending
    Body { length: Option<usize> },
    /// Closing delimiter or end of input reached
    Done,
    /// A previous part was malformed; the cursor cannot resume
    Failed,
}

/// Sequential cursor over the parts of a multipart byte stream
///
/// `next_part` is cancel-safe: every step commits its progress to the
/// cursor before the next await, so dropping the future (for example under
/// `tokio::time::timeout`) and calling again resumes where it left off.
pub struct PartReader<R> {
    reader: R,
    buf: BytesMut,
    /// `--<boundary>`
    dash_boundary: Vec<u8>,
    /// `\n--<boundary>`
    nl_dash_boundary: Vec<u8>,
    state: ReaderState,
    /// Headers of the part being read
    headers: HeaderMap,
    header_bytes: usize,
    eof: bool,
    max_part_size: usize,
    max_header_size: usize,
}

impl<R: AsyncRead + Unpin> PartReader<R> {
    /// Create a reader for parts delimited by `boundary`
    pub fn new(reader: R, boundary: &str) -> Self {
        let mut dash_boundary = Vec::with_capacity(boundary.len() + 2);
        dash_boundary.extend_from_slice(b"--");
        dash_boundary.extend_from_slice(boundary.as_bytes());

        let mut nl_dash_boundary = Vec::with_capacity(dash_boundary.len() + 1);
        nl_dash_boundary.push(b'\n');
        nl_dash_boundary.extend_from_slice(&dash_boundary);

        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            dash_boundary,
            nl_dash_boundary,
            state: ReaderState::Preamble,
            headers: HeaderMap::new(),
            header_bytes: 0,
            eof: false,
            max_part_size: DEFAULT_MAX_PART_SIZE,
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }

    /// Set size limits for part bodies and header blocks
    pub fn limits(mut self, max_part_size: usize, max_header_size: usize) -> Self {
        self.max_part_size = max_part_size;
        self.max_header_size = max_header_size;
        self
    }

    /// Boundary token this reader is bound to
    pub fn boundary(&self) -> &str {
        // Constructed from a &str, so the tail after "--" is valid UTF-8
        std::str::from_utf8(&self.dash_boundary[2..]).unwrap_or_default()
    }

    /// Read the next part
    ///
    /// Returns `Error::EndOfStream` after the closing delimiter or at a
    /// clean end of input, and `Error::MalformedPart` when the stream does
    /// not follow the multipart grammar.
    pub async fn next_part(&mut self) -> Result<Part> {
        match self.read_part().await {
            Err(Error::MalformedPart(reason)) => {
                self.state = ReaderState::Failed;
                Err(Error::MalformedPart(reason))
            }
            other => other,
        }
    }

    async fn read_part(&mut self) -> Result<Part> {
        loop {
            match self.state {
                ReaderState::Done => return Err(Error::EndOfStream),
                ReaderState::Failed => {
                    return Err(Error::MalformedPart(
                        "reader cannot resume after a malformed part".into(),
                    ))
                }
                ReaderState::Preamble => self.skip_to_delimiter().await?,
                ReaderState::Delimiter => self.finish_delimiter().await?,
                ReaderState::Headers => self.read_headers().await?,
                ReaderState::Body { length: Some(length) } => {
                    let body = self.read_sized_body(length).await?;
                    // The trailing CRLF and delimiter are consumed by the next call
                    self.state = ReaderState::Preamble;
                    return Ok(self.take_part(body));
                }
                ReaderState::Body { length: None } => {
                    let body = self.read_delimited_body().await?;
                    self.state = ReaderState::Delimiter;
                    return Ok(self.take_part(body));
                }
            }
        }
    }

    fn take_part(&mut self, body: Bytes) -> Part {
        self.header_bytes = 0;
        Part {
            headers: std::mem::take(&mut self.headers),
            body,
        }
    }

    /// Pull more bytes into the buffer; `false` at end of input
    async fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        self.buf.reserve(READ_CHUNK);
        let n = self.reader.read_buf(&mut self.buf).await?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n > 0)
    }

    /// Read one line, stripping the terminating `\n` and an optional `\r`
    ///
    /// Returns `None` at end of input; a trailing partial line stays in the
    /// buffer.
    async fn read_line(&mut self) -> Result<Option<BytesMut>> {
        let mut scanned = 0;
        loop {
            if let Some(pos) = self.buf[scanned..].iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(scanned + pos + 1);
                line.truncate(line.len() - 1);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Ok(Some(line));
            }

            scanned = self.buf.len();
            if scanned > self.max_header_size {
                return Err(Error::MalformedPart("line exceeds header size limit".into()));
            }
            if !self.fill().await? {
                return Ok(None);
            }
        }
    }

    async fn skip_to_delimiter(&mut self) -> Result<()> {
        loop {
            let Some(line) = self.read_line().await? else {
                self.state = ReaderState::Done;
                return if self.buf.iter().all(u8::is_ascii_whitespace) {
                    Err(Error::EndOfStream)
                } else {
                    Err(Error::MalformedPart("stream ended before boundary".into()))
                };
            };

            let line = trim_end(&line);
            if line == self.dash_boundary.as_slice() {
                self.state = ReaderState::Headers;
                return Ok(());
            }
            if let Some(rest) = line.strip_prefix(self.dash_boundary.as_slice()) {
                if rest == b"--" {
                    self.state = ReaderState::Done;
                    return Err(Error::EndOfStream);
                }
            }
            // Preamble line, skipped
        }
    }

    async fn finish_delimiter(&mut self) -> Result<()> {
        let Some(line) = self.read_line().await? else {
            // Input ended right after a delimiter
            self.state = ReaderState::Done;
            let rest = trim(&self.buf);
            return if rest.is_empty() || rest == b"--" {
                Err(Error::EndOfStream)
            } else {
                Err(Error::MalformedPart("unexpected data after boundary".into()))
            };
        };

        let line = trim(&line);
        if line.starts_with(b"--") {
            self.state = ReaderState::Done;
            return Err(Error::EndOfStream);
        }
        if !line.is_empty() {
            return Err(Error::MalformedPart("unexpected data after boundary".into()));
        }
        self.state = ReaderState::Headers;
        Ok(())
    }

    /// Read header lines into the pending part until the blank line
    async fn read_headers(&mut self) -> Result<()> {
        loop {
            let line = self.read_line().await?.ok_or_else(|| {
                Error::MalformedPart("stream ended inside part headers".into())
            })?;

            if line.is_empty() {
                // An unparsable length falls back to delimiter scanning
                let length = self.headers.get(CONTENT_LENGTH).and_then(parse_length);
                self.state = ReaderState::Body { length };
                return Ok(());
            }

            self.header_bytes += line.len();
            if self.header_bytes > self.max_header_size {
                return Err(Error::MalformedPart("part headers exceed size limit".into()));
            }

            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| Error::MalformedPart("header line without colon".into()))?;

            let name = HeaderName::from_bytes(trim(&line[..colon]))
                .map_err(|e| Error::MalformedPart(format!("invalid header name: {}", e)))?;
            let value = HeaderValue::from_bytes(trim(&line[colon + 1..]))
                .map_err(|e| Error::MalformedPart(format!("invalid header value: {}", e)))?;

            self.headers.append(name, value);
        }
    }

    /// Read exactly `length` body bytes
    async fn read_sized_body(&mut self, length: usize) -> Result<Bytes> {
        if length > self.max_part_size {
            return Err(Error::MalformedPart("part exceeds size limit".into()));
        }
        while self.buf.len() < length {
            if !self.fill().await? {
                return Err(Error::MalformedPart(
                    "stream ended inside part body".into(),
                ));
            }
        }
        Ok(self.buf.split_to(length).freeze())
    }

    /// Read a body that ends at the next delimiter
    async fn read_delimited_body(&mut self) -> Result<Bytes> {
        let delim_len = self.nl_dash_boundary.len();
        let mut search_from = 0;

        loop {
            if let Some(rel) = find(&self.buf[search_from..], &self.nl_dash_boundary) {
                let at = search_from + rel;
                let after = at + delim_len;

                // Look at what follows the token before accepting it
                if self.buf.len() < after + 2 && !self.eof {
                    self.fill().await?;
                    continue;
                }

                let terminated = match self.buf.get(after) {
                    None => true,
                    Some(b'\r' | b'\n' | b' ' | b'\t') => true,
                    Some(b'-') => matches!(self.buf.get(after + 1), None | Some(b'-')),
                    Some(_) => false,
                };

                if terminated {
                    let end = if at > 0 && self.buf[at - 1] == b'\r' {
                        at - 1
                    } else {
                        at
                    };
                    if end > self.max_part_size {
                        return Err(Error::MalformedPart("part exceeds size limit".into()));
                    }
                    let body = self.buf.split_to(end).freeze();
                    self.buf.advance(after - end);
                    return Ok(body);
                }

                // Boundary-like bytes inside the payload
                search_from = at + 1;
                continue;
            }

            if self.buf.len() > self.max_part_size {
                return Err(Error::MalformedPart("part exceeds size limit".into()));
            }

            search_from = self.buf.len().saturating_sub(delim_len - 1);
            if !self.fill().await? {
                return Err(Error::MalformedPart(
                    "stream ended inside part body".into(),
                ));
            }
        }
    }
}

fn parse_length(value: &HeaderValue) -> Option<usize> {
    value.to_str().ok()?.trim().parse().ok()
}

impl<R> std::fmt::Debug for PartReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartReader")
            .field("boundary", &String::from_utf8_lossy(&self.dash_boundary[2..]))
            .field("state", &self.state)
            .field("buffered", &self.buf.len())
            .finish()
    }
}

/// Position of `needle` in `haystack`
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let first = *needle.first()?;
    let mut offset = 0;

    while offset + needle.len() <= haystack.len() {
        let pos = haystack[offset..].iter().position(|&b| b == first)?;
        let start = offset + pos;
        if haystack.len() - start < needle.len() {
            return None;
        }
        if &haystack[start..start + needle.len()] == needle {
            return Some(start);
        }
        offset = start + 1;
    }
    None
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    trim_end(&bytes[start..])
}

fn trim_end(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(0, |p| p + 1);
    &bytes[..end]
}
