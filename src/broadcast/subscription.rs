//! Subscriber delivery endpoint
//!
//! A `Subscription` is the receiving half of one subscriber's single-slot
//! mailbox. Membership in the broadcaster set is released when the
//! subscription is detached, either explicitly or on drop.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::{Error, Result};

use super::stream::{Frame, Shared};

/// Identity of a subscriber within one broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub(super) u64);

impl SubscriberId {
    /// Numeric value of the id
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving endpoint for one attached subscriber
///
/// Holds at most one pending frame. Dropping the subscription detaches it.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Frame>,
    shared: Arc<Shared>,
    detached: bool,
}

impl Subscription {
    pub(super) fn new(id: SubscriberId, rx: mpsc::Receiver<Frame>, shared: Arc<Shared>) -> Self {
        Self {
            id,
            rx,
            shared,
            detached: false,
        }
    }

    /// Get the subscriber id
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether this subscription has been detached from its broadcaster
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub(super) fn belongs_to(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// Wait for the next frame
    ///
    /// Returns `None` once the subscription is detached or the broadcaster
    /// is closed and the mailbox is empty.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Take the pending frame without waiting
    ///
    /// - `Ok(Some(frame))`: a frame was waiting in the mailbox
    /// - `Ok(None)`: the mailbox is empty
    /// - `Err(Error::StreamClosed)`: end of stream, no frame will ever arrive
    pub fn try_recv(&mut self) -> Result<Option<Frame>> {
        match self.rx.try_recv() {
            Ok(frame) => Ok(Some(frame)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::StreamClosed),
        }
    }

    /// Remove this subscriber from the broadcaster
    ///
    /// Idempotent, and safe to call while the broadcaster is updating or
    /// closing.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        self.shared.remove(self.id);
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.detached)
            .finish()
    }
}
