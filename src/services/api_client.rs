//! Backend calls used when replaying queued offline actions

use crate::database::LocalStore;
use crate::error::AppError;
use crate::filesystem;
use crate::models::{QueueItem, QueueItemType};
use crate::services::auth_service;
use crate::services::replay_service::ReplayHandler;
use async_trait::async_trait;
use photo_upload::{HttpPhotoTransport, PhotoTarget, PhotoTransport, TokenSource};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Token source backed by the persisted auth blob, read on every request
pub fn store_token_source(store: &LocalStore) -> TokenSource {
    let store = store.clone();
    Arc::new(move || auth_service::read_token(&store))
}

/// Replays queue items over HTTP
pub struct HttpReplayHandler {
    client: reqwest::Client,
    base_url: String,
    token: TokenSource,
    photos: HttpPhotoTransport,
}

impl HttpReplayHandler {
    pub fn new(base_url: &str, store: &LocalStore, timeout: Duration) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .tcp_keepalive(Duration::from_secs(30))
            .user_agent(concat!("OptiTourBooth/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let token = store_token_source(store);
        let photos = HttpPhotoTransport::with_timeout(base_url, token.clone(), timeout)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            photos,
        })
    }

    /// Endpoint for a JSON-replayed item
    pub fn endpoint(&self, item: &QueueItem) -> Result<String, AppError> {
        endpoint_for(&self.base_url, item)
    }

    async fn post_json(&self, item: &QueueItem) -> Result<(), AppError> {
        let url = self.endpoint(item)?;
        let mut request = self.client.post(&url).json(&item.payload);
        if let Some(token) = (self.token)() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Http(format!(
                "{} returned status {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    async fn upload_photo(&self, item: &QueueItem) -> Result<(), AppError> {
        let target = photo_target(item)?;
        let path = item
            .payload_str("filePath")
            .ok_or_else(|| AppError::Validation(format!("{} has no filePath", item.id)))?;
        let file = filesystem::read_photo_file(Path::new(path))?;

        let id = item.id.clone();
        let progress = Arc::new(move |percent: u8| {
            log::trace!("Replaying {}: {}%", id, percent);
        });
        let server_path = self.photos.upload(&target, file, progress).await?;
        log::info!("Queued photo {} stored at {}", path, server_path);
        Ok(())
    }
}

fn required_id(item: &QueueItem, field: &str) -> Result<String, AppError> {
    item.payload_id(field)
        .ok_or_else(|| AppError::Validation(format!("{} has no {}", item.id, field)))
}

fn photo_target(item: &QueueItem) -> Result<PhotoTarget, AppError> {
    Ok(PhotoTarget::new(
        required_id(item, "tourneeId")?,
        required_id(item, "pointId")?,
    ))
}

fn endpoint_for(base_url: &str, item: &QueueItem) -> Result<String, AppError> {
    let base = base_url.trim_end_matches('/');
    let tour = required_id(item, "tourneeId")?;
    match item.item_type {
        QueueItemType::GpsPosition => Ok(format!("{}/tournees/{}/positions", base, tour)),
        QueueItemType::PointCompletion => Ok(format!(
            "{}/tournees/{}/points/{}/complete",
            base,
            tour,
            required_id(item, "pointId")?
        )),
        QueueItemType::PhotoUpload => Ok(format!(
            "{}/{}",
            base,
            photo_target(item)?.upload_path()
        )),
    }
}

#[async_trait]
impl ReplayHandler for HttpReplayHandler {
    async fn replay(&self, item: &QueueItem) -> Result<(), AppError> {
        match item.item_type {
            QueueItemType::GpsPosition | QueueItemType::PointCompletion => {
                self.post_json(item).await
            }
            QueueItemType::PhotoUpload => self.upload_photo(item).await,
        }
    }
}
