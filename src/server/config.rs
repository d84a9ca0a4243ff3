//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent requests (0 = unlimited)
    ///
    /// A live viewer holds its slot until its session ends.
    pub max_connections: usize,

    /// Path serving the live multipart stream (must differ from `snapshot_path`)
    pub stream_path: String,

    /// Path serving a single JPEG snapshot
    pub snapshot_path: String,

    /// Serve an HTML page embedding the stream at `/`
    pub index_page: bool,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// A response head must be produced within this time, else 408
    ///
    /// Live streams answer at once, so this only bounds snapshot waits.
    pub request_timeout: Duration,

    /// How long a snapshot request waits for a first frame
    pub snapshot_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            max_connections: 0, // Unlimited
            stream_path: "/mjpeg".to_string(),
            snapshot_path: "/jpeg".to_string(),
            index_page: true,
            tcp_nodelay: true, // Frames are flushed whole, don't hold them back
            request_timeout: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the live stream path
    pub fn stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = normalize_path(path.into());
        self
    }

    /// Set the snapshot path
    pub fn snapshot_path(mut self, path: impl Into<String>) -> Self {
        self.snapshot_path = normalize_path(path.into());
        self
    }

    /// Disable the index page
    pub fn disable_index_page(mut self) -> Self {
        self.index_page = false;
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set snapshot timeout
    pub fn snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }
}

fn normalize_path(path: String) -> String {
    if path.starts_with('/') {
        path
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();

        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.max_connections, 0);
        assert_eq!(config.stream_path, "/mjpeg");
        assert_eq!(config.snapshot_path, "/jpeg");
        assert!(config.index_page);
        assert!(config.tcp_nodelay);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.snapshot_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_with_addr() {
        let addr: SocketAddr = "127.0.0.1:8081".parse().unwrap();
        let config = ServerConfig::with_addr(addr);

        assert_eq!(config.bind_addr.port(), 8081);
    }

    #[test]
    fn test_paths_normalized() {
        let config = ServerConfig::default()
            .stream_path("video")
            .snapshot_path("/still.jpg");

        assert_eq!(config.stream_path, "/video");
        assert_eq!(config.snapshot_path, "/still.jpg");
    }

    #[test]
    fn test_builder_chaining() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let config = ServerConfig::default()
            .bind(addr)
            .max_connections(50)
            .disable_index_page()
            .request_timeout(Duration::from_secs(5))
            .snapshot_timeout(Duration::from_secs(2));

        assert_eq!(config.bind_addr, addr);
        assert_eq!(config.max_connections, 50);
        assert!(!config.index_page);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.snapshot_timeout, Duration::from_secs(2));
    }
}
