//! HTTP multipart transport for photo uploads
//!
//! Posts one binary `photos` field per request to
//! `{base_url}/tournees/{tour}/points/{point}/photos` and reports progress as
//! the body chunks are pulled by the connection.

use crate::models::{PhotoFile, PhotoTarget};
use crate::transport::{
    parse_upload_response, PhotoTransport, ProgressCallback, UploadError, UploadResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, Stream};
use std::sync::Arc;
use std::time::Duration;

/// Size of the body chunks used for progress reporting
const CHUNK_SIZE: usize = 64 * 1024;

/// Supplies the bearer token at request time; `None` sends the request unauthenticated
pub type TokenSource = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Uploads photos to the backend over HTTP
pub struct HttpPhotoTransport {
    client: reqwest::Client,
    base_url: String,
    token: TokenSource,
}

impl HttpPhotoTransport {
    /// Create a transport with default timeouts
    pub fn new(base_url: impl Into<String>, token: TokenSource) -> UploadResult<Self> {
        Self::with_timeout(base_url, token, Duration::from_secs(120))
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: TokenSource,
        timeout: Duration,
    ) -> UploadResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(concat!("OptiTourBooth/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| UploadError::Network(format!("Client build failed: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
            token,
        })
    }

    pub fn upload_url(&self, target: &PhotoTarget) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            target.upload_path()
        )
    }
}

/// Splits the payload into chunks and reports the sent percentage as each
/// chunk is pulled
fn progress_chunks(
    data: Bytes,
    progress: ProgressCallback,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let total = data.len();
    let chunks: Vec<Bytes> = (0..total)
        .step_by(CHUNK_SIZE)
        .map(|start| data.slice(start..(start + CHUNK_SIZE).min(total)))
        .collect();

    let mut sent = 0usize;
    stream::iter(chunks.into_iter().map(move |chunk| {
        sent += chunk.len();
        progress(percent(sent, total));
        Ok::<Bytes, std::io::Error>(chunk)
    }))
}

fn progress_body(data: Bytes, progress: ProgressCallback) -> reqwest::Body {
    reqwest::Body::wrap_stream(progress_chunks(data, progress))
}

fn percent(sent: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((sent.min(total) * 100) / total) as u8
}

#[async_trait]
impl PhotoTransport for HttpPhotoTransport {
    async fn upload(
        &self,
        target: &PhotoTarget,
        file: PhotoFile,
        progress: ProgressCallback,
    ) -> UploadResult<String> {
        let url = self.upload_url(target);
        let length = file.data.len() as u64;

        let part = reqwest::multipart::Part::stream_with_length(
            progress_body(file.data, progress),
            length,
        )
        .file_name(file.name.clone())
        .mime_str(&file.mime)
        .map_err(|e| UploadError::Other(format!("Invalid MIME type {}: {}", file.mime, e)))?;

        let form = reqwest::multipart::Form::new().part("photos", part);

        let mut request = self.client.post(&url).multipart(form);
        match (self.token)() {
            Some(token) => request = request.bearer_auth(token),
            None => log::debug!("No auth token available, uploading {} unauthenticated", file.name),
        }

        let response = request
            .send()
            .await
            .map_err(|e| UploadError::Network(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| UploadError::Network(format!("Failed to read response: {}", e)))?;

        parse_upload_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 200), 0);
        assert_eq!(percent(100, 200), 50);
        assert_eq!(percent(200, 200), 100);
        assert_eq!(percent(0, 0), 100);
    }

    #[test]
    fn test_upload_url() {
        let transport =
            HttpPhotoTransport::new("https://api.example.com/api/", Arc::new(|| None::<String>)).unwrap();
        let target = PhotoTarget::new("12", "34");
        assert_eq!(
            transport.upload_url(&target),
            "https://api.example.com/api/tournees/12/points/34/photos"
        );
    }

    #[tokio::test]
    async fn test_chunk_progress_rises_to_100() {
        let data = Bytes::from(vec![7u8; CHUNK_SIZE * 3 + 100]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let progress: ProgressCallback = Arc::new(move |p| seen_clone.lock().unwrap().push(p));

        let mut chunks = Box::pin(progress_chunks(data.clone(), progress));
        let mut received = Vec::new();
        while let Some(chunk) = chunks.next().await {
            received.extend_from_slice(&chunk.unwrap());
        }

        assert_eq!(received, data.to_vec());
        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(*seen.last().unwrap(), 100);
    }

    /// Reads one request (head and body) and returns it as text
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            let Some(head_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok());

            let complete = match length {
                Some(len) => buf.len() >= head_end + 4 + len,
                None if head.contains("transfer-encoding: chunked") => buf.ends_with(b"0\r\n\r\n"),
                None => true,
            };
            if complete {
                break;
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Answers one connection per scripted response and returns the captured requests
    async fn serve(
        responses: Vec<(u16, &'static str)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let response = format!(
                    "HTTP/1.1 {} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
            requests
        });

        (base_url, handle)
    }

    fn photo() -> PhotoFile {
        PhotoFile::new("a.jpg", "image/jpeg", vec![0xFFu8, 0xD8, 0xFF, 0xE0, 1, 2, 3])
    }

    fn no_progress() -> ProgressCallback {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_server_error_maps_to_status_and_sends_bearer() {
        let (base_url, server) = serve(vec![(500, "{}")]).await;
        let transport =
            HttpPhotoTransport::new(base_url, Arc::new(|| Some("abc".to_string()))).unwrap();

        let result = transport
            .upload(&PhotoTarget::new("12", "34"), photo(), no_progress())
            .await;
        assert!(matches!(result, Err(UploadError::Status(500))), "{:?}", result);

        let requests = server.await.unwrap();
        let request = requests[0].to_lowercase();
        assert!(request.starts_with("post /api/tournees/12/points/34/photos "));
        assert!(request.contains("authorization: bearer abc"));
        assert!(request.contains("name=\"photos\""));
        assert!(request.contains("filename=\"a.jpg\""));
    }

    #[tokio::test]
    async fn test_success_without_token_returns_server_path() {
        let (base_url, server) = serve(vec![(200, r#"{"data":[{"path":"/uploads/a.jpg"}]}"#)]).await;
        let transport = HttpPhotoTransport::new(base_url, Arc::new(|| None::<String>)).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let progress: ProgressCallback = Arc::new(move |p| seen_clone.lock().unwrap().push(p));

        let path = transport
            .upload(&PhotoTarget::new("12", "34"), photo(), progress)
            .await
            .unwrap();
        assert_eq!(path, "/uploads/a.jpg");
        assert_eq!(seen.lock().unwrap().last().copied(), Some(100));

        let requests = server.await.unwrap();
        assert!(!requests[0].to_lowercase().contains("authorization:"));
    }
}
