//! HTTP server for a single MJPEG broadcaster
//!
//! Serves the live stream, a snapshot endpoint and an optional index page
//! with `axum`. Applications with their own router can skip this module
//! and drive a [`StreamSession`](crate::session::StreamSession) with an
//! [`HttpSink`](crate::session::HttpSink) or a
//! [`BodySink`](crate::session::BodySink) instead.

pub mod config;
pub mod listener;
mod routes;

pub use config::ServerConfig;
pub use listener::MjpegServer;
