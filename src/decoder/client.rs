//! Decoder construction from an HTTP response
//!
//! The response `Content-Type` must be a multipart type carrying a
//! `boundary` parameter. The body is streamed; nothing is buffered beyond
//! the part currently being read.

use std::io;

use bytes::Bytes;
use futures_util::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::multipart::boundary_from_content_type;

use super::{Decoder, DecoderConfig};

/// Response body adapted to `AsyncRead`
pub type ResponseBody = StreamReader<BoxStream<'static, io::Result<Bytes>>, Bytes>;

impl Decoder<ResponseBody> {
    /// Fetch `url` with a default client and decode its body
    pub async fn from_url(url: &str) -> Result<Self> {
        Self::from_url_with_client(&Client::new(), url).await
    }

    /// Fetch `url` with the given client and decode its body
    pub async fn from_url_with_client(client: &Client, url: &str) -> Result<Self> {
        let response = client.get(url).send().await?.error_for_status()?;
        tracing::debug!(url = url, status = %response.status(), "Connected to MJPEG source");
        Self::from_response(response)
    }

    /// Decode the body of an already received response
    ///
    /// Fails with `Error::InvalidContentType` if the `Content-Type` header is
    /// missing or is not a multipart type, and `Error::InvalidBoundary` if the
    /// boundary parameter is empty.
    pub fn from_response(response: Response) -> Result<Self> {
        Self::from_response_with_config(response, DecoderConfig::default())
    }

    /// Decode the body of an already received response with custom limits
    pub fn from_response_with_config(response: Response, config: DecoderConfig) -> Result<Self> {
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .ok_or_else(|| Error::InvalidContentType("missing Content-Type header".to_string()))?
            .to_str()
            .map_err(|_| Error::InvalidContentType("non-ASCII Content-Type header".to_string()))?
            .to_string();

        if !content_type
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("multipart/")
        {
            return Err(Error::InvalidContentType(content_type));
        }
        let boundary = boundary_from_content_type(&content_type)?;

        let body = response.bytes_stream().map_err(io::Error::other).boxed();
        Ok(Self::with_config(StreamReader::new(body), &boundary, config))
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;
    use crate::decoder::jpeg::tests::sample_jpeg;

    /// Serve one canned HTTP response and return its URL
    async fn serve_once(head: String, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        format!("http://{}/mjpeg", addr)
    }

    #[tokio::test]
    async fn test_from_url_decodes_frames() {
        let jpeg = sample_jpeg(16, 16, 3);
        let mut body = Vec::new();
        body.extend_from_slice(b"--cam\r\nContent-Type: image/jpeg\r\n\r\n");
        body.extend_from_slice(&jpeg);
        body.extend_from_slice(b"\r\n--cam--\r\n");

        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: multipart/x-mixed-replace; boundary=--cam\r\n\
                    Connection: close\r\n\r\n"
            .to_string();
        let url = serve_once(head, body).await;

        let mut decoder = Decoder::from_url(&url).await.unwrap();
        assert_eq!(decoder.boundary(), "cam");

        let image = decoder.decode().await.unwrap();
        assert_eq!((image.width(), image.height()), (16, 16));
        assert!(matches!(decoder.decode().await, Err(Error::EndOfStream)));
    }

    #[tokio::test]
    async fn test_from_url_rejects_non_multipart() {
        let head = "HTTP/1.1 200 OK\r\n\
                    Content-Type: image/jpeg\r\n\
                    Content-Length: 0\r\n\r\n"
            .to_string();
        let url = serve_once(head, Vec::new()).await;

        assert!(matches!(
            Decoder::from_url(&url).await,
            Err(Error::InvalidContentType(_))
        ));
    }

    #[tokio::test]
    async fn test_from_url_http_error_status() {
        let head = "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_string();
        let url = serve_once(head, Vec::new()).await;

        assert!(matches!(
            Decoder::from_url(&url).await,
            Err(Error::Http(_))
        ));
    }
}
