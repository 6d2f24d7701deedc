use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Raw photo payload as picked by the user (or produced by compression)
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoFile {
    pub name: String,
    pub mime: String,
    pub data: Bytes,
}

impl PhotoFile {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// Builds a file from raw bytes, guessing the MIME type from the content
    /// and falling back to the file extension
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let name = name.into();
        let data = data.into();
        let mime = guess_mime(&name, &data).to_string();
        Self { name, mime, data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn guess_mime(name: &str, data: &[u8]) -> &'static str {
    if let Ok(format) = image::guess_format(data) {
        return format.to_mime_type();
    }
    match name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") | Some("heif") => "image/heic",
        _ => "application/octet-stream",
    }
}

/// Tour stop a photo session belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoTarget {
    pub tour_id: String,
    pub point_id: String,
}

impl PhotoTarget {
    pub fn new(tour_id: impl Into<String>, point_id: impl Into<String>) -> Self {
        Self {
            tour_id: tour_id.into(),
            point_id: point_id.into(),
        }
    }

    /// Relative upload path: `tournees/{tour}/points/{point}/photos`
    pub fn upload_path(&self) -> String {
        format!(
            "tournees/{}/points/{}/photos",
            self.tour_id, self.point_id
        )
    }
}

/// Upload state of a single photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    Pending,
    Uploading,
    Done,
    Error,
}

/// A photo in the current upload session
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoItem {
    pub id: Uuid,
    /// Released once the upload is done
    pub file: Option<PhotoFile>,
    /// Data URL for immediate display
    pub preview: String,
    /// 0..=100, never decreases within one attempt
    pub progress: u8,
    pub status: PhotoStatus,
    pub server_path: Option<String>,
    pub error: Option<String>,
}

impl PhotoItem {
    pub fn new(file: PhotoFile, preview: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            file: Some(file),
            preview,
            progress: 0,
            status: PhotoStatus::Pending,
            server_path: None,
            error: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.status, PhotoStatus::Done | PhotoStatus::Error)
    }
}

/// Configuration for client-side compression
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Longest edge in pixels
    pub max_dimension: u32,
    /// Target upper bound for the encoded output
    pub max_size_bytes: usize,
    /// Initial JPEG quality (1-100)
    pub quality: u8,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1920,
            max_size_bytes: 1024 * 1024,
            quality: 80,
        }
    }
}
