//! Frame broadcaster for live MJPEG fan-out
//!
//! The broadcaster holds the set of attached viewers and hands every new
//! frame to each of them without ever waiting on a slow one.
//!
//! # Architecture
//!
//! ```text
//!                         MjpegStream (Arc<Shared>)
//!                     ┌──────────────────────────────┐
//!                     │ subscribers: Mutex<Option<   │
//!                     │   HashMap<SubscriberId,      │
//!                     │     mpsc::Sender<Frame>>>>   │
//!                     │ latest: Mutex<Option<Frame>> │
//!                     └──────────────┬───────────────┘
//!                                    │ try_send (never blocks)
//!         ┌──────────────────────────┼──────────────────────────┐
//!         ▼                          ▼                          ▼
//!   [Subscription]             [Subscription]             [Subscription]
//!   slot: 1 frame              slot: 1 frame              slot: 1 frame
//!         │                          │                          │
//!   StreamSession ──► sink     StreamSession ──► sink     current()
//! ```
//!
//! # Drop-if-busy
//!
//! Each subscriber owns a mailbox of capacity one. If the mailbox still holds
//! an unread frame when the next one arrives, the new frame is dropped for
//! that subscriber only. `Frame` is `bytes::Bytes`, so filling N mailboxes
//! costs N reference count increments and no payload copies.

pub mod config;
pub mod stream;
pub mod subscription;

pub use config::StreamConfig;
pub use stream::{Frame, MjpegStream};
pub use subscription::{SubscriberId, Subscription};
