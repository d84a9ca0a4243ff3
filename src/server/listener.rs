//! MJPEG HTTP server listener
//!
//! Binds the listener and serves the router from [`routes`](super::routes)
//! with `axum::serve`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;

use crate::broadcast::MjpegStream;
use crate::error::Result;
use crate::server::config::ServerConfig;
use crate::server::routes::{self, AppState, Counters};
use crate::stats::ServerStats;

/// HTTP server publishing one broadcaster
pub struct MjpegServer {
    config: Arc<ServerConfig>,
    stream: MjpegStream,
    counters: Arc<Counters>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl MjpegServer {
    /// Create a new server with its own broadcaster
    pub fn new(config: ServerConfig) -> Self {
        Self::with_stream(config, MjpegStream::new())
    }

    /// Create a new server publishing an existing broadcaster
    pub fn with_stream(config: ServerConfig, stream: MjpegStream) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            stream,
            counters: Arc::new(Counters::new()),
            connection_semaphore,
        }
    }

    /// The broadcaster frames are published to
    pub fn stream(&self) -> &MjpegStream {
        &self.stream
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Request counters
    pub fn stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.counters.total.load(Ordering::Relaxed),
            active_connections: self.counters.active.load(Ordering::Relaxed),
            rejected_connections: self.counters.rejected.load(Ordering::Relaxed),
            uptime: self.counters.started_at.elapsed(),
        }
    }

    /// Run the server
    ///
    /// Only returns if the listener fails to bind or the server fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.log_listening(&listener);

        let app = routes::router(self.state()).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .tcp_nodelay(self.config.tcp_nodelay)
            .await?;
        Ok(())
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` resolves the broadcaster is closed, so every live
    /// session writes its closing delimiter and ends; the server returns once
    /// open connections have finished.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve from an already bound listener until `shutdown` resolves
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.log_listening(&listener);

        let stream = self.stream.clone();
        let signal = async move {
            shutdown.await;
            tracing::info!("Shutdown signal received");
            // Live responses only end once their sessions see the close
            stream.close();
        };

        let app = routes::router(self.state()).into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener, app)
            .tcp_nodelay(self.config.tcp_nodelay)
            .with_graceful_shutdown(signal)
            .await;

        self.stream.close();
        result.map_err(|e| {
            tracing::error!(error = %e, "Server failed");
            e.into()
        })
    }

    fn state(&self) -> AppState {
        AppState {
            config: Arc::clone(&self.config),
            stream: self.stream.clone(),
            counters: Arc::clone(&self.counters),
            limit: self.connection_semaphore.clone(),
        }
    }

    fn log_listening(&self, listener: &TcpListener) {
        let addr = listener.local_addr().unwrap_or(self.config.bind_addr);
        tracing::info!(
            addr = %addr,
            stream = %self.config.stream_path,
            snapshot = %self.config.snapshot_path,
            "MJPEG server listening"
        );
    }
}

impl std::fmt::Debug for MjpegServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MjpegServer")
            .field("bind_addr", &self.config.bind_addr)
            .field("stream", &self.stream)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
    use reqwest::{Client, StatusCode};
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::decoder::Decoder;
    use crate::error::Error;

    struct TestServer {
        server: Arc<MjpegServer>,
        addr: SocketAddr,
        client: Client,
        shutdown: oneshot::Sender<()>,
        handle: JoinHandle<Result<()>>,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("http://{}{}", self.addr, path)
        }

        async fn get(&self, path: &str) -> reqwest::Response {
            self.client.get(self.url(path)).send().await.unwrap()
        }
    }

    async fn start(config: ServerConfig) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(MjpegServer::new(config));
        let (shutdown, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .serve_until(listener, async {
                        let _ = rx.await;
                    })
                    .await
            }
        });

        TestServer {
            server,
            addr,
            client: Client::builder().no_proxy().build().unwrap(),
            shutdown,
            handle,
        }
    }

    #[tokio::test]
    async fn test_not_found() {
        let test = start(ServerConfig::default()).await;

        let response = test.get("/nothing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_method_not_allowed() {
        let test = start(ServerConfig::default()).await;

        let response = test.client.post(test.url("/mjpeg")).send().await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let allow = response.headers()["allow"].to_str().unwrap();
        assert!(allow.contains("GET"));
        assert_eq!(test.server.stream().watcher_count(), 0);
    }

    #[tokio::test]
    async fn test_index_page() {
        let test = start(ServerConfig::default()).await;

        let response = test.get("/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap().to_string();
        assert!(content_type.starts_with("text/html"));
        assert!(response.text().await.unwrap().contains("<img src=\"/mjpeg\""));

        let test = start(ServerConfig::default().disable_index_page()).await;
        assert_eq!(test.get("/").await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_snapshot_uses_latest_frame() {
        let test = start(ServerConfig::default()).await;
        test.server
            .stream()
            .update(Bytes::from_static(b"SNAPSHOT"))
            .unwrap();

        let response = test.get("/jpeg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/jpeg");
        assert_eq!(response.content_length(), Some(8));
        assert_eq!(&response.bytes().await.unwrap()[..], b"SNAPSHOT");
    }

    #[tokio::test]
    async fn test_snapshot_waits_for_next_frame() {
        let test = start(ServerConfig::default()).await;

        let stream = test.server.stream().clone();
        let publisher = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stream.update(Bytes::from_static(b"FIRST")).unwrap();
        });

        let response = test.get("/jpeg").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.bytes().await.unwrap()[..], b"FIRST");
        publisher.await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_times_out_without_frames() {
        let config = ServerConfig::default().snapshot_timeout(Duration::from_millis(50));
        let test = start(config).await;

        let response = test.get("/jpeg").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_live_stream() {
        let test = start(ServerConfig::default()).await;
        let response = test.get("/mjpeg").await;

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("multipart/x-mixed-replace; boundary="));
        assert_eq!(response.headers()["cache-control"], "no-cache, no-store, must-revalidate");

        let stream = test.server.stream().clone();
        let publisher = tokio::spawn(async move {
            while stream.update(Bytes::from_static(b"LIVEFRAME")).is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        });

        let mut decoder = Decoder::from_response(response).unwrap();
        let part = tokio::time::timeout(Duration::from_secs(5), decoder.next_part())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(part.content_type(), Some("image/jpeg"));
        assert_eq!(part.content_length(), Some(9));
        assert_eq!(&part.body()[..], b"LIVEFRAME");

        test.shutdown.send(()).unwrap();
        test.handle.await.unwrap().unwrap();
        publisher.await.unwrap();
        assert!(test.server.stream().is_closed());

        // Closing the broadcaster ends the live response with the closing delimiter
        loop {
            match decoder.next_frame().await {
                Ok(frame) => assert_eq!(&frame[..], b"LIVEFRAME"),
                Err(e) => {
                    assert!(matches!(e, Error::EndOfStream), "unexpected error: {}", e);
                    break;
                }
            }
        }
    }

    #[tokio::test]
    async fn test_viewer_disconnect_detaches() {
        let test = start(ServerConfig::default()).await;
        let response = test.get("/mjpeg").await;
        assert_eq!(test.server.stream().watcher_count(), 1);
        assert_eq!(test.server.stats().active_connections, 1);

        drop(response);

        let stream = test.server.stream().clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while stream.watcher_count() > 0 {
                let _ = stream.update(Bytes::from_static(b"FRAME"));
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            while test.server.stats().active_connections > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_stream_after_shutdown_unavailable() {
        let test = start(ServerConfig::default()).await;
        test.server.stream().close();

        let response = test.get("/mjpeg").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let test = start(ServerConfig::default().max_connections(1)).await;

        // Headers have arrived, so the viewer holds its slot
        let _viewer = test.get("/mjpeg").await;
        assert_eq!(test.server.stream().watcher_count(), 1);

        let response = test.get("/jpeg").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[RETRY_AFTER], "1");

        let stats = test.server.stats();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.active_connections, 1);
        assert_eq!(stats.rejected_connections, 1);
    }

    #[tokio::test]
    async fn test_custom_paths() {
        let config = ServerConfig::default()
            .stream_path("video")
            .snapshot_path("still.jpg");
        let test = start(config).await;
        test.server.stream().update(Bytes::from_static(b"JPEG")).unwrap();

        assert_eq!(test.get("/still.jpg").await.status(), StatusCode::OK);
        assert_eq!(test.get("/jpeg").await.status(), StatusCode::NOT_FOUND);
        let index = test.get("/").await.text().await.unwrap();
        assert!(index.contains("<img src=\"/video\""));
    }
}
