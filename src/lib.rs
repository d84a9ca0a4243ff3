//! Motion-JPEG streaming over `multipart/x-mixed-replace`
//!
//! A producer pushes encoded JPEG frames into an [`MjpegStream`]; every
//! attached viewer receives them through its own [`StreamSession`], framed
//! as one part of a never-ending multipart HTTP response. Slow viewers miss
//! frames instead of slowing down the producer or each other.
//!
//! ```text
//!  camera ──► MjpegStream::update ──┬──► StreamSession ──► HttpSink ──► viewer
//!                                   ├──► StreamSession ──► HttpSink ──► viewer
//!                                   └──► current() / latest() (snapshots)
//!
//!  remote MJPEG ──► Decoder::from_url ──► next_frame() / decode()
//! ```
//!
//! # Serving
//!
//! ```no_run
//! use mjpeg_rs::{MjpegServer, ServerConfig};
//!
//! # async fn example(frames: Vec<Vec<u8>>) -> mjpeg_rs::Result<()> {
//! let server = MjpegServer::new(ServerConfig::default());
//! let stream = server.stream().clone();
//!
//! tokio::spawn(async move {
//!     for frame in frames {
//!         if stream.update(frame).is_err() {
//!             break;
//!         }
//!     }
//! });
//!
//! server.run().await
//! # }
//! ```

pub mod broadcast;
pub mod decoder;
pub mod error;
pub mod multipart;
pub mod server;
pub mod session;
pub mod stats;

pub use broadcast::{Frame, MjpegStream, StreamConfig, SubscriberId, Subscription};
pub use decoder::{Decoder, DecoderConfig};
pub use error::{Error, Result};
pub use multipart::{MultipartWriter, Part, PartReader};
pub use server::{MjpegServer, ServerConfig};
pub use session::{BodySink, FrameSink, HttpSink, SessionOutcome, StreamSession};
pub use stats::{ServerStats, SessionStats, StreamStats};
