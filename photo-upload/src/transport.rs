//! Upload transport seam
//!
//! The pipeline talks to the backend only through [`PhotoTransport`], so the
//! HTTP implementation can be swapped for a fake in tests.

use crate::models::{PhotoFile, PhotoTarget};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use std::sync::Arc;

/// Receives upload progress as a percentage (0-100)
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Result type for upload operations
pub type UploadResult<T> = Result<T, UploadError>;

/// Errors that can occur during a photo upload
#[derive(Debug, Clone, PartialEq)]
pub enum UploadError {
    /// Request never got a response
    Network(String),
    /// Server answered with a non-2xx status
    Status(u16),
    /// Response body could not be understood
    InvalidResponse(String),
    Other(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Network(e) => write!(f, "Network error: {}", e),
            UploadError::Status(code) => write!(f, "Server returned status {}", code),
            UploadError::InvalidResponse(e) => write!(f, "Invalid response: {}", e),
            UploadError::Other(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for UploadError {}

/// Sends one photo to the backend and returns its server path
#[async_trait]
pub trait PhotoTransport: Send + Sync + 'static {
    async fn upload(
        &self,
        target: &PhotoTarget,
        file: PhotoFile,
        progress: ProgressCallback,
    ) -> UploadResult<String>;
}

#[derive(Debug, Deserialize)]
struct PhotoDescriptor {
    path: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(PhotoDescriptor),
    Many(Vec<PhotoDescriptor>),
}

#[derive(Debug, Deserialize)]
struct UploadEnvelope {
    data: OneOrMany,
}

/// Extracts the stored path from `{ "data": descriptor | [descriptor, ...] }`.
/// For arrays the first descriptor wins.
pub fn parse_upload_response(body: &str) -> UploadResult<String> {
    let envelope: UploadEnvelope = serde_json::from_str(body)
        .map_err(|e| UploadError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

    match envelope.data {
        OneOrMany::One(descriptor) => Ok(descriptor.path),
        OneOrMany::Many(list) => list
            .into_iter()
            .next()
            .map(|d| d.path)
            .ok_or_else(|| UploadError::InvalidResponse("Empty photo list".to_string())),
    }
}

/// Renders a file as a `data:` URL for immediate display
pub fn preview_data_url(file: &PhotoFile) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(&file.data);
    format!("data:{};base64,{}", file.mime, b64)
}
