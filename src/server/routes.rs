//! HTTP routes: live stream, snapshot and index page

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::broadcast::{Frame, MjpegStream};
use crate::multipart::IMAGE_JPEG;
use crate::server::config::ServerConfig;
use crate::session::{HttpSink, StreamSession};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

#[derive(Debug)]
pub(crate) struct Counters {
    pub(crate) total: AtomicU64,
    pub(crate) active: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) started_at: Instant,
}

impl Counters {
    pub(crate) fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            active: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }
}

/// Slot held for as long as a request is being served
///
/// For the live stream that is the lifetime of the streaming session, not
/// just of the handler.
struct Admission {
    _permit: Option<OwnedSemaphorePermit>,
    counters: Arc<Counters>,
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// State shared by every route
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) stream: MjpegStream,
    pub(crate) counters: Arc<Counters>,
    pub(crate) limit: Option<Arc<Semaphore>>,
}

impl AppState {
    fn admit(&self, peer: SocketAddr) -> Result<Admission, Response> {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let permit = match &self.limit {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer, "Request rejected: limit reached");
                    return Err((
                        StatusCode::SERVICE_UNAVAILABLE,
                        [(header::RETRY_AFTER, "1")],
                        "too many connections\n",
                    )
                        .into_response());
                }
            },
            None => None,
        };

        self.counters.active.fetch_add(1, Ordering::Relaxed);
        Ok(Admission {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }
}

/// Build the router for one broadcaster
///
/// The index page is only routed when neither media path is `/`.
pub(crate) fn router(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let mut router = Router::new()
        .route(&config.stream_path, get(live_stream))
        .route(&config.snapshot_path, get(snapshot));

    if config.index_page && config.stream_path != "/" && config.snapshot_path != "/" {
        router = router.route("/", get(index));
    }

    router
        .fallback(not_found)
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live_stream(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let admission = match state.admit(peer) {
        Ok(admission) => admission,
        Err(response) => return response,
    };

    let (sink, body) = HttpSink::channel();
    let session = match StreamSession::new(&state.stream, sink) {
        Ok(session) => session,
        Err(_) => return (StatusCode::SERVICE_UNAVAILABLE, "stream closed\n").into_response(),
    };

    let content_type = session.content_type();
    tracing::info!(
        session_id = session.id(),
        peer = %peer,
        watchers = state.stream.watcher_count(),
        "Viewer attached"
    );

    tokio::spawn(async move {
        let _admission = admission;
        let stats = session.run().await;
        tracing::debug!(
            session_id = stats.session_id,
            peer = %peer,
            frames = stats.frames_sent,
            fps = stats.framerate(),
            "Viewer detached"
        );
    });

    (
        [(header::CONTENT_TYPE, content_type)],
        [
            (header::CACHE_CONTROL, NO_CACHE),
            (header::PRAGMA, "no-cache"),
            (header::CONNECTION, "close"),
        ],
        body,
    )
        .into_response()
}

async fn snapshot(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let _admission = match state.admit(peer) {
        Ok(admission) => admission,
        Err(response) => return response,
    };

    match latest_or_next(&state).await {
        Some(frame) => (
            [(header::CONTENT_TYPE, IMAGE_JPEG), (header::CACHE_CONTROL, NO_CACHE)],
            frame,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "no frame available\n").into_response(),
    }
}

/// Latest published frame, or the next one if nothing was published yet
async fn latest_or_next(state: &AppState) -> Option<Frame> {
    if let Some(frame) = state.stream.latest() {
        return Some(frame);
    }
    match tokio::time::timeout(state.config.snapshot_timeout, state.stream.current()).await {
        Ok(Ok(frame)) => Some(frame),
        Ok(Err(_)) | Err(_) => None,
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(format!(
        "<!DOCTYPE html>\n<html>\n<head><title>MJPEG</title></head>\n\
         <body style=\"margin:0\"><img src=\"{}\" alt=\"live\"></body>\n</html>\n",
        state.config.stream_path
    ))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found\n")
}
