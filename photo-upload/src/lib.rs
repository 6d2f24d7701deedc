//! # Photo Upload
//!
//! Client-side photo upload pipeline for tour stops.
//!
//! This crate provides:
//! - Best-effort image compression before transfer (bounded dimension, size and quality)
//! - Data-URL previews for immediate display
//! - A per-photo state machine (`pending → uploading → done | error`) with
//!   progress tracking and manual retry
//! - An HTTP multipart transport (behind the `http` feature)
//!
//! ## Separation of Concerns
//!
//! This crate does **not**:
//! - Store photos (the list lives only for one upload session)
//! - Retry automatically (retry is a user action)
//! - Know where the auth token comes from (the application supplies it)
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use photo_upload::{HttpPhotoTransport, PhotoPipeline, PhotoTarget};
//!
//! let transport = HttpPhotoTransport::new("https://api.example.com", token_source)?;
//! let pipeline = PhotoPipeline::new(PhotoTarget::new("12", "34"), transport, Default::default());
//! let ids = pipeline.add_photos(files).await;
//! ```

pub mod compress;
pub mod models;
pub mod pipeline;
pub mod transport;

#[cfg(feature = "http")]
pub mod http;

pub use compress::{calculate_resize_dimensions, compress_photo, compress_photo_blocking, CompressError};
pub use models::{CompressionConfig, PhotoFile, PhotoItem, PhotoStatus, PhotoTarget};
pub use pipeline::{PhotoPipeline, SubscriptionId};
pub use transport::{
    parse_upload_response, preview_data_url, PhotoTransport, ProgressCallback, UploadError,
    UploadResult,
};

#[cfg(feature = "http")]
pub use http::{HttpPhotoTransport, TokenSource};
