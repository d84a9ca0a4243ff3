//! Per-viewer streaming session
//!
//! A session owns one subscription and one sink. It polls the subscription
//! on the broadcaster's poll interval, frames each frame as a multipart part,
//! writes and flushes it, and ends on idle timeout, sink failure, or
//! broadcaster close. Every exit path detaches the subscription and closes
//! the sink.

use std::time::Duration;

use crate::broadcast::config::MIN_POLL_INTERVAL;
use crate::broadcast::{Frame, MjpegStream, Subscription};
use crate::error::{Error, Result};
use crate::multipart::{FrameHeaders, MultipartWriter};
use crate::stats::SessionStats;

use super::sink::FrameSink;
use super::state::{unix_now, SessionOutcome, SessionPhase, SessionState};

/// Streaming session serving one viewer
pub struct StreamSession<S> {
    state: SessionState,
    subscription: Subscription,
    sink: S,
    writer: MultipartWriter,
    poll_interval: Duration,
    idle_timeout: Duration,
}

impl<S: FrameSink> StreamSession<S> {
    /// Attach to `stream` with a freshly generated boundary
    ///
    /// Fails with `Error::StreamClosed` if the stream is closed.
    pub fn new(stream: &MjpegStream, sink: S) -> Result<Self> {
        Self::with_writer(stream, sink, MultipartWriter::new())
    }

    /// Attach to `stream` using a preconfigured multipart writer
    pub fn with_writer(stream: &MjpegStream, sink: S, writer: MultipartWriter) -> Result<Self> {
        let subscription = stream.attach()?;
        let config = stream.config();

        Ok(Self {
            state: SessionState::new(subscription.id().as_u64()),
            subscription,
            sink,
            writer,
            // The field is public, so a zero interval can bypass the builders
            poll_interval: config.poll_interval.max(MIN_POLL_INTERVAL),
            idle_timeout: config.idle_timeout,
        })
    }

    /// Session id (the subscriber id)
    pub fn id(&self) -> u64 {
        self.state.id
    }

    /// Current phase
    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    /// `Content-Type` of the response body this session produces
    pub fn content_type(&self) -> String {
        self.writer.content_type()
    }

    /// Multipart boundary token
    pub fn boundary(&self) -> &str {
        self.writer.boundary()
    }

    /// Stream frames until the session terminates
    pub async fn run(mut self) -> SessionStats {
        tracing::debug!(session_id = self.state.id, "Session started");

        let outcome = self.stream().await;
        self.state.fail(outcome);
        self.teardown(outcome).await;

        let stats = SessionStats {
            session_id: self.state.id,
            frames_sent: self.state.frames_sent,
            bytes_sent: self.state.bytes_sent,
            duration: self.state.duration(),
            outcome: self.state.outcome,
        };

        tracing::info!(
            session_id = stats.session_id,
            frames = stats.frames_sent,
            bytes = stats.bytes_sent,
            duration_ms = stats.duration.as_millis() as u64,
            outcome = %outcome,
            "Session ended"
        );

        stats
    }

    async fn stream(&mut self) -> SessionOutcome {
        let content_type = self.writer.content_type();
        if let Err(e) = self.sink.begin(&content_type).await {
            tracing::debug!(session_id = self.state.id, error = %e, "Failed to write envelope");
            return SessionOutcome::SinkError;
        }
        self.state.start_streaming();

        loop {
            tokio::time::sleep(self.poll_interval).await;

            match self.subscription.try_recv() {
                Ok(Some(frame)) => {
                    if let Err(e) = self.send_frame(frame).await {
                        tracing::debug!(session_id = self.state.id, error = %e, "Sink write failed");
                        return SessionOutcome::SinkError;
                    }
                }
                Ok(None) => {
                    if self.state.idle_for() > self.idle_timeout {
                        tracing::debug!(
                            session_id = self.state.id,
                            idle_secs = self.idle_timeout.as_secs(),
                            "Session idle, closing"
                        );
                        return SessionOutcome::IdleTimeout;
                    }
                }
                Err(_) => return SessionOutcome::Closed,
            }
        }
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        let headers = FrameHeaders::new(frame.len(), self.state.start_unix, unix_now());
        let head = self.writer.frame_head(&headers);

        self.sink.write(&head).await.map_err(Error::Io)?;
        self.sink.write(&frame).await.map_err(Error::Io)?;
        self.sink.flush().await.map_err(Error::Io)?;

        self.state.on_frame(frame.len());
        Ok(())
    }

    async fn teardown(&mut self, outcome: SessionOutcome) {
        self.subscription.detach();

        if outcome != SessionOutcome::SinkError {
            // Best effort: the viewer may already be gone
            let tail = self.writer.finish();
            if self.sink.write(&tail).await.is_ok() {
                let _ = self.sink.flush().await;
            }
        }
        let _ = self.sink.close().await;

        self.state.terminate();
    }
}

impl<S> std::fmt::Debug for StreamSession<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("id", &self.state.id)
            .field("phase", &self.state.phase)
            .field("boundary", &self.writer.boundary())
            .finish()
    }
}
