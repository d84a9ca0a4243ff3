//! Output sinks for streaming sessions
//!
//! A sink always exposes `flush`; sinks that need no flushing implement it
//! as a no-op.

use std::future::Future;
use std::io;

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Chunks in flight between a session and its response body
///
/// One chunk is one flushed frame; a viewer that has not drained it yet
/// holds up only its own session.
const BODY_CHANNEL_CAPACITY: usize = 1;

/// Destination of one viewer's multipart stream
pub trait FrameSink: Send {
    /// Emit the response envelope for a body of the given content type
    fn begin(&mut self, content_type: &str) -> impl Future<Output = io::Result<()>> + Send;

    /// Write a chunk of the body
    fn write(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Push buffered bytes to the viewer
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Release the sink
    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send;
}

/// Sink feeding an HTTP response body through a channel
///
/// The receiving half is an [`axum::body::Body`]; the HTTP stack writes the
/// response head and hands the chunks to the viewer. Writes are buffered
/// until `flush`, which sends them as one chunk and waits while the body is
/// still draining the previous one. Once the body is dropped (the viewer
/// went away) every flush fails with `BrokenPipe`.
#[derive(Debug)]
pub struct HttpSink {
    tx: Option<mpsc::Sender<io::Result<Bytes>>>,
    pending: BytesMut,
}

impl HttpSink {
    /// Create a sink and the response body it feeds
    pub fn channel() -> (Self, Body) {
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(BODY_CHANNEL_CAPACITY);

        let sink = Self {
            tx: Some(tx),
            pending: BytesMut::new(),
        };
        (sink, Body::from_stream(ReceiverStream::new(rx)))
    }
}

impl FrameSink for HttpSink {
    async fn begin(&mut self, _content_type: &str) -> io::Result<()> {
        // The response head is built by the HTTP stack
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.tx.is_none() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        self.pending.extend_from_slice(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        let Some(tx) = &self.tx else {
            return Err(io::ErrorKind::BrokenPipe.into());
        };
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        tx.send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped"))
    }

    async fn close(&mut self) -> io::Result<()> {
        let result = self.flush().await;
        // Dropping the sender ends the response body
        self.tx = None;
        result
    }
}

/// Sink writing only the multipart body
///
/// For embedding in an HTTP stack that writes the response head itself,
/// using [`StreamSession::content_type`](super::StreamSession::content_type).
#[derive(Debug)]
pub struct BodySink<W> {
    inner: W,
}

impl<W> BodySink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Get the underlying writer
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameSink for BodySink<W> {
    async fn begin(&mut self, _content_type: &str) -> io::Result<()> {
        Ok(())
    }

    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.inner.write_all(chunk).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }
}
