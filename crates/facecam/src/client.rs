//! HTTP client for the face-analysis backend.
//!
//! `/analyze` takes a JPEG still and returns an `AnalysisResult`;
//! `/register` stores a named face for later matching.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use facecam_core::{AnalysisResult, RegisterReply};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("rate limited by backend")]
    RateLimited,
    #[error("backend returned HTTP {status}")]
    Status { status: u16, message: Option<String> },
    #[error("{0}")]
    Backend(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("no response within {0:?}")]
    TimedOut(Duration),
}

/// How the JPEG still is carried in the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// `{"image": "data:image/jpeg;base64,..."}`
    #[default]
    Json,
    /// `multipart/form-data` with an `image` file part.
    Multipart,
}

impl PayloadFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(PayloadFormat::Json),
            "multipart" | "form" => Some(PayloadFormat::Multipart),
            _ => None,
        }
    }
}

/// The remote service that analyzes and registers faces.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    async fn analyze(&self, jpeg: Vec<u8>) -> Result<AnalysisResult, AnalysisError>;
    async fn register(&self, name: &str, jpeg: Vec<u8>) -> Result<RegisterReply, AnalysisError>;
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
    payload: PayloadFormat,
}

impl HttpBackend {
    pub fn new(
        base_url: &str,
        payload: PayloadFormat,
        connect_timeout: Duration,
    ) -> Result<Self, AnalysisError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            payload,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post(
        &self,
        path: &str,
        name: Option<&str>,
        jpeg: Vec<u8>,
        file_name: &'static str,
    ) -> Result<Vec<u8>, AnalysisError> {
        let request = self.client.post(self.endpoint(path));
        let request = match self.payload {
            PayloadFormat::Json => {
                let mut body = serde_json::Map::new();
                body.insert("image".into(), data_url(&jpeg).into());
                if let Some(name) = name {
                    body.insert("name".into(), name.into());
                }
                request.json(&body)
            }
            PayloadFormat::Multipart => {
                let image = Part::bytes(jpeg)
                    .file_name(file_name)
                    .mime_str("image/jpeg")
                    .map_err(|e| AnalysisError::Transport(e.to_string()))?;
                let mut form = Form::new();
                if let Some(name) = name {
                    form = form.text("name", name.to_string());
                }
                request.multipart(form.part("image", image))
            }
        };

        let response = request
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| AnalysisError::Transport(e.to_string()))?;

        tracing::debug!(path, status = status.as_u16(), bytes = body.len(), "backend replied");

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AnalysisError::RateLimited);
        }
        if !status.is_success() {
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }
        Ok(body.to_vec())
    }
}

#[async_trait]
impl AnalysisBackend for HttpBackend {
    async fn analyze(&self, jpeg: Vec<u8>) -> Result<AnalysisResult, AnalysisError> {
        let body = self.post("analyze", None, jpeg, "frame.jpg").await?;
        let result =
            AnalysisResult::from_json(&body).map_err(|e| AnalysisError::Decode(e.to_string()))?;
        if let Some(error) = result.error {
            return Err(AnalysisError::Backend(error));
        }
        Ok(result)
    }

    async fn register(&self, name: &str, jpeg: Vec<u8>) -> Result<RegisterReply, AnalysisError> {
        let body = self.post("register", Some(name), jpeg, "face.jpg").await?;
        serde_json::from_slice(&body).map_err(|e| AnalysisError::Decode(e.to_string()))
    }
}

fn data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))
}

/// Pull a human-readable message out of an error body, if it has one.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["error", "message", "detail"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Serve exactly one HTTP response and hand back the raw request.
    async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            let reply = format!(
                "HTTP/1.1 {status} Test\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
            let _ = sock.shutdown().await;
            request
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body = &buf[end + 4..];
            if head.contains("transfer-encoding: chunked") {
                if body.ends_with(b"0\r\n\r\n") {
                    break;
                }
                continue;
            }
            let len = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if body.len() >= len {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    fn backend(url: &str, payload: PayloadFormat) -> HttpBackend {
        HttpBackend::new(url, payload, Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_analyze_sends_data_url_and_decodes() {
        let (url, server) = serve_once(
            200,
            r#"{"age": 30, "dominant_gender": "Man", "face_confidence": 0.93}"#,
        )
        .await;
        let result = backend(&url, PayloadFormat::Json)
            .analyze(vec![0xFF, 0xD8, 0xFF])
            .await
            .unwrap();
        assert_eq!(result.age, Some(30.0));
        assert_eq!(result.face_confidence, Some(0.93));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /analyze "));
        assert!(request.contains("data:image/jpeg;base64,/9j/"));
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let (url, _server) = serve_once(429, r#"{"error": "slow down"}"#).await;
        let err = backend(&url, PayloadFormat::Json)
            .analyze(vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::RateLimited));
    }

    #[tokio::test]
    async fn test_server_error_carries_body_message() {
        let (url, _server) = serve_once(500, r#"{"error": "model not loaded"}"#).await;
        let err = backend(&url, PayloadFormat::Json)
            .analyze(vec![1])
            .await
            .unwrap_err();
        match err {
            AnalysisError::Status { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message.as_deref(), Some("model not loaded"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_field_in_success_body() {
        let (url, _server) = serve_once(200, r#"{"error": "No image provided"}"#).await;
        let err = backend(&url, PayloadFormat::Json)
            .analyze(vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Backend(ref m) if m == "No image provided"));
    }

    #[tokio::test]
    async fn test_garbage_body_is_decode_error() {
        let (url, _server) = serve_once(200, "<html>oops</html>").await;
        let err = backend(&url, PayloadFormat::Json)
            .analyze(vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Decode(_)));
    }

    #[tokio::test]
    async fn test_register_multipart_fields() {
        let (url, server) = serve_once(
            200,
            r#"{"status": "success", "message": "Alice registered"}"#,
        )
        .await;
        let reply = backend(&url, PayloadFormat::Multipart)
            .register("Alice", vec![0xFF, 0xD8])
            .await
            .unwrap();
        assert!(reply.is_success());
        assert_eq!(reply.message.as_deref(), Some("Alice registered"));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /register "));
        assert!(request.contains(r#"name="name""#));
        assert!(request.contains("Alice"));
        assert!(request.contains(r#"filename="face.jpg""#));
    }

    #[tokio::test]
    async fn test_refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = backend(&format!("http://{addr}/"), PayloadFormat::Json)
            .analyze(vec![1])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Transport(_)));
    }

    #[test]
    fn test_payload_parse() {
        assert_eq!(PayloadFormat::parse("JSON"), Some(PayloadFormat::Json));
        assert_eq!(PayloadFormat::parse("multipart"), Some(PayloadFormat::Multipart));
        assert_eq!(PayloadFormat::parse("xml"), None);
    }
}
