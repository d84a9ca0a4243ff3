//! Broadcaster implementation
//!
//! `MjpegStream` is a cheap-to-clone handle onto the shared subscriber set.
//! The producer side (`update`, `close`, `watcher_count`) is synchronous and
//! never awaits, so it can be driven from a capture thread as well as from a
//! task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{Error, Result};
use crate::session::{FrameSink, SessionStats, StreamSession};
use crate::stats::StreamStats;

use super::config::StreamConfig;
use super::subscription::{SubscriberId, Subscription};

/// One encoded JPEG image
pub type Frame = Bytes;

/// State shared between the broadcaster handle and its subscriptions
pub(crate) struct Shared {
    /// Attached mailboxes; `None` once the stream is closed
    subscribers: Mutex<Option<HashMap<SubscriberId, mpsc::Sender<Frame>>>>,

    /// Most recent frame passed to `update`
    latest: Mutex<Option<Frame>>,

    next_id: AtomicU64,
    config: StreamConfig,
    created_at: Instant,

    frames_published: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Shared {
    /// Remove a subscriber from the set; no-op if absent or closed
    pub(super) fn remove(&self, id: SubscriberId) {
        let removed = {
            let mut subscribers = self.subscribers.lock();
            subscribers.as_mut().and_then(|set| set.remove(&id))
        };

        if removed.is_some() {
            tracing::debug!(subscriber = %id, "Subscriber detached");
        }
    }
}

/// Live MJPEG frame broadcaster
///
/// # Example
/// ```no_run
/// use bytes::Bytes;
/// use mjpeg_rs::MjpegStream;
///
/// # fn next_jpeg() -> Vec<u8> { Vec::new() }
/// let stream = MjpegStream::new();
///
/// // Producer loop: skip encoding work when nobody is watching
/// if stream.watcher_count() > 0 {
///     stream.update(Bytes::from(next_jpeg())).unwrap();
/// }
///
/// stream.close();
/// ```
#[derive(Clone)]
pub struct MjpegStream {
    shared: Arc<Shared>,
}

impl MjpegStream {
    /// Create a new broadcaster with default configuration
    pub fn new() -> Self {
        Self::with_config(StreamConfig::default())
    }

    /// Create a new broadcaster with custom configuration
    pub fn with_config(config: StreamConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                subscribers: Mutex::new(Some(HashMap::new())),
                latest: Mutex::new(None),
                next_id: AtomicU64::new(1),
                config,
                created_at: Instant::now(),
                frames_published: AtomicU64::new(0),
                frames_delivered: AtomicU64::new(0),
                frames_dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Get the broadcaster configuration
    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    /// Register a new subscriber
    ///
    /// Returns `Error::StreamClosed` if the stream has been closed.
    pub fn attach(&self) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(1);
        let id = SubscriberId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));

        let watchers = {
            let mut subscribers = self.shared.subscribers.lock();
            let set = subscribers.as_mut().ok_or(Error::StreamClosed)?;
            set.insert(id, tx);
            set.len()
        };

        tracing::debug!(subscriber = %id, watchers = watchers, "Subscriber attached");

        Ok(Subscription::new(id, rx, Arc::clone(&self.shared)))
    }

    /// Remove a subscriber
    ///
    /// Equivalent to [`Subscription::detach`]. Idempotent.
    pub fn detach(&self, subscription: &mut Subscription) {
        if !subscription.belongs_to(&self.shared) {
            tracing::warn!(
                subscriber = %subscription.id(),
                "Detach called with a subscription from another stream"
            );
            return;
        }
        subscription.detach();
    }

    /// Deliver a frame to every attached subscriber
    ///
    /// Never blocks: a subscriber whose mailbox still holds an unread frame
    /// misses this one. Returns the number of subscribers that received it.
    pub fn update(&self, frame: impl Into<Frame>) -> Result<usize> {
        let frame = frame.into();
        let mut delivered = 0u64;
        let mut dropped = 0u64;

        {
            let mut subscribers = self.shared.subscribers.lock();
            let set = subscribers.as_mut().ok_or(Error::StreamClosed)?;

            set.retain(|_, tx| match tx.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    dropped += 1;
                    true
                }
                // Receiver went away without detaching
                Err(TrySendError::Closed(_)) => false,
            });

            *self.shared.latest.lock() = Some(frame);
        }

        self.shared.frames_published.fetch_add(1, Ordering::Relaxed);
        self.shared
            .frames_delivered
            .fetch_add(delivered, Ordering::Relaxed);
        self.shared
            .frames_dropped
            .fetch_add(dropped, Ordering::Relaxed);

        if dropped > 0 {
            tracing::trace!(delivered = delivered, dropped = dropped, "Frame dropped for busy subscribers");
        }

        Ok(delivered as usize)
    }

    /// Number of currently attached subscribers
    ///
    /// Producers use this to skip frame production when nobody is watching.
    pub fn watcher_count(&self) -> usize {
        self.shared
            .subscribers
            .lock()
            .as_ref()
            .map_or(0, HashMap::len)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.shared.subscribers.lock().is_none()
    }

    /// Close the stream permanently
    ///
    /// Every attached subscription observes end of stream. Idempotent.
    pub fn close(&self) {
        let drained = self.shared.subscribers.lock().take();
        self.shared.latest.lock().take();

        if let Some(set) = drained {
            let watchers = set.len();
            // Senders are dropped here, outside the lock
            drop(set);
            tracing::info!(watchers = watchers, "Stream closed");
        }
    }

    /// Wait for the next frame
    ///
    /// Attaches a temporary subscription that is released on return, on
    /// cancellation, and when the stream closes (`Error::StreamClosed`).
    pub async fn current(&self) -> Result<Frame> {
        let mut subscription = self.attach()?;
        subscription.recv().await.ok_or(Error::StreamClosed)
    }

    /// Most recent frame passed to `update`, without waiting
    pub fn latest(&self) -> Option<Frame> {
        self.shared.latest.lock().clone()
    }

    /// Serve the live stream to a sink until the session terminates
    pub async fn serve<S: FrameSink>(&self, sink: S) -> Result<SessionStats> {
        let session = StreamSession::new(self, sink)?;
        Ok(session.run().await)
    }

    /// Get broadcaster statistics
    pub fn stats(&self) -> StreamStats {
        StreamStats {
            watchers: self.watcher_count(),
            frames_published: self.shared.frames_published.load(Ordering::Relaxed),
            frames_delivered: self.shared.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.shared.frames_dropped.load(Ordering::Relaxed),
            uptime: self.shared.created_at.elapsed(),
            closed: self.is_closed(),
        }
    }
}

impl Default for MjpegStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MjpegStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MjpegStream")
            .field("watchers", &self.watcher_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn frame(tag: &'static [u8]) -> Frame {
        Bytes::from_static(tag)
    }

    #[test]
    fn test_attach_detach() {
        let stream = MjpegStream::new();

        let mut a = stream.attach().unwrap();
        let b = stream.attach().unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(stream.watcher_count(), 2);

        stream.detach(&mut a);
        assert!(a.is_detached());
        assert_eq!(stream.watcher_count(), 1);

        // Idempotent
        stream.detach(&mut a);
        a.detach();
        assert_eq!(stream.watcher_count(), 1);

        drop(b);
        assert_eq!(stream.watcher_count(), 0);
    }

    #[test]
    fn test_detach_foreign_subscription() {
        let stream = MjpegStream::new();
        let other = MjpegStream::new();

        let mut sub = other.attach().unwrap();
        stream.detach(&mut sub);

        assert!(!sub.is_detached());
        assert_eq!(other.watcher_count(), 1);
    }

    #[test]
    fn test_update_delivers_to_all() {
        let stream = MjpegStream::new();
        let mut a = stream.attach().unwrap();
        let mut b = stream.attach().unwrap();

        let delivered = stream.update(frame(b"f1")).unwrap();
        assert_eq!(delivered, 2);

        assert_eq!(a.try_recv().unwrap(), Some(frame(b"f1")));
        assert_eq!(b.try_recv().unwrap(), Some(frame(b"f1")));
        assert_eq!(a.try_recv().unwrap(), None);
    }

    #[test]
    fn test_drop_if_busy() {
        let stream = MjpegStream::new();
        let mut slow = stream.attach().unwrap();
        let mut fast = stream.attach().unwrap();

        stream.update(frame(b"f1")).unwrap();
        assert_eq!(fast.try_recv().unwrap(), Some(frame(b"f1")));

        // Slow subscriber still holds f1, so f2 is dropped for it only
        let delivered = stream.update(frame(b"f2")).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(fast.try_recv().unwrap(), Some(frame(b"f2")));

        assert_eq!(slow.try_recv().unwrap(), Some(frame(b"f1")));
        assert_eq!(slow.try_recv().unwrap(), None);

        stream.update(frame(b"f3")).unwrap();
        assert_eq!(slow.try_recv().unwrap(), Some(frame(b"f3")));

        let stats = stream.stats();
        assert_eq!(stats.frames_published, 3);
        assert_eq!(stats.frames_delivered, 5);
        assert_eq!(stats.frames_dropped, 1);
    }

    #[test]
    fn test_update_without_watchers() {
        let stream = MjpegStream::new();

        assert_eq!(stream.update(frame(b"f1")).unwrap(), 0);
        assert_eq!(stream.latest(), Some(frame(b"f1")));
    }

    #[test]
    fn test_late_subscriber_misses_earlier_frame() {
        let stream = MjpegStream::new();
        let mut subs: Vec<_> = (0..3).map(|_| stream.attach().unwrap()).collect();

        stream.update(frame(b"f1")).unwrap();

        let mut late = stream.attach().unwrap();
        assert_eq!(late.try_recv().unwrap(), None);

        for sub in subs.iter_mut() {
            assert_eq!(sub.try_recv().unwrap(), Some(frame(b"f1")));
        }

        stream.update(frame(b"f2")).unwrap();
        assert_eq!(late.try_recv().unwrap(), Some(frame(b"f2")));
    }

    #[test]
    fn test_close() {
        let stream = MjpegStream::new();
        let mut a = stream.attach().unwrap();
        let mut b = stream.attach().unwrap();

        stream.close();

        assert!(stream.is_closed());
        assert_eq!(stream.watcher_count(), 0);
        assert!(matches!(a.try_recv(), Err(Error::StreamClosed)));
        assert!(matches!(b.try_recv(), Err(Error::StreamClosed)));
        assert!(stream.latest().is_none());

        // Idempotent
        stream.close();
        assert!(stream.is_closed());
    }

    #[test]
    fn test_use_after_close() {
        let stream = MjpegStream::new();
        stream.close();

        assert!(matches!(stream.attach(), Err(Error::StreamClosed)));
        assert!(matches!(
            stream.update(frame(b"f1")),
            Err(Error::StreamClosed)
        ));
    }

    #[test]
    fn test_detach_after_close() {
        let stream = MjpegStream::new();
        let mut sub = stream.attach().unwrap();

        stream.close();
        stream.detach(&mut sub);

        assert!(sub.is_detached());
        assert_eq!(stream.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_recv_end_of_stream_after_close() {
        let stream = MjpegStream::new();
        let mut sub = stream.attach().unwrap();

        let waiter = tokio::spawn(async move { sub.recv().await });
        tokio::task::yield_now().await;
        stream.close();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_current() {
        let stream = MjpegStream::new();

        let reader = stream.clone();
        let handle = tokio::spawn(async move { reader.current().await });

        while stream.watcher_count() == 0 {
            tokio::task::yield_now().await;
        }
        stream.update(frame(b"snapshot")).unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), frame(b"snapshot"));
        assert_eq!(stream.watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_current_closed_while_waiting() {
        let stream = MjpegStream::new();

        let reader = stream.clone();
        let handle = tokio::spawn(async move { reader.current().await });

        while stream.watcher_count() == 0 {
            tokio::task::yield_now().await;
        }
        stream.close();

        assert!(matches!(handle.await.unwrap(), Err(Error::StreamClosed)));
    }

    #[tokio::test]
    async fn test_current_cancelled_does_not_leak() {
        let stream = MjpegStream::new();

        let result = tokio::time::timeout(Duration::from_millis(10), stream.current()).await;

        assert!(result.is_err());
        assert_eq!(stream.watcher_count(), 0);
    }

    #[test]
    fn test_concurrent_update_and_close() {
        let stream = MjpegStream::new();
        let _subs: Vec<_> = (0..8).map(|_| stream.attach().unwrap()).collect();

        let producer = {
            let stream = stream.clone();
            std::thread::spawn(move || {
                for _ in 0..10_000 {
                    if stream.update(Bytes::from_static(b"frame")).is_err() {
                        return true;
                    }
                }
                false
            })
        };

        std::thread::sleep(Duration::from_millis(1));
        stream.close();

        // Producer either finished or observed the close; it never hangs
        let _ = producer.join().unwrap();
        assert_eq!(stream.watcher_count(), 0);
    }
}
