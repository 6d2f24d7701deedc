use crate::config::BoothConfig;
use crate::database::LocalStore;
use crate::error::AppError;
use crate::filesystem;
use crate::models::QueueItemType;
use crate::models::queue_item::Payload;
use crate::services::api_client::store_token_source;
use crate::services::offline_queue::OfflineQueue;
use photo_upload::{
    HttpPhotoTransport, PhotoFile, PhotoItem, PhotoPipeline, PhotoStatus, PhotoTarget,
    PhotoTransport,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Creates an upload session for one tour stop, authenticated from the local store
pub fn http_pipeline(
    config: &BoothConfig,
    store: &LocalStore,
    target: PhotoTarget,
) -> Result<PhotoPipeline<HttpPhotoTransport>, AppError> {
    let transport = HttpPhotoTransport::with_timeout(
        config.api_base_url.as_str(),
        store_token_source(store),
        config.request_timeout(),
    )?;
    Ok(PhotoPipeline::new(target, transport, config.compression))
}

/// Reads the given files; unreadable ones are logged and skipped
pub fn read_photo_files(paths: &[PathBuf]) -> Vec<(PathBuf, PhotoFile)> {
    paths
        .iter()
        .filter_map(|path| match filesystem::read_photo_file(path) {
            Ok(file) => Some((path.clone(), file)),
            Err(e) => {
                log::error!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect()
}

/// Waits until every photo of the session is done or failed
pub async fn wait_until_settled<T: PhotoTransport>(
    pipeline: &PhotoPipeline<T>,
    poll: Duration,
) -> Vec<PhotoItem> {
    while pipeline.is_busy() {
        tokio::time::sleep(poll).await;
    }
    pipeline.photos()
}

/// Queues every failed photo of a session as a `photo-upload` item so the
/// replay driver can send it later. Returns the queued ids.
pub fn queue_failed_photos(
    queue: &mut OfflineQueue,
    target: &PhotoTarget,
    photos: &[PhotoItem],
    sources: &[(Uuid, PathBuf)],
) -> Vec<String> {
    photos
        .iter()
        .filter(|p| p.status == PhotoStatus::Error)
        .filter_map(|p| {
            let (_, path) = sources.iter().find(|(id, _)| *id == p.id)?;
            Some(queue.enqueue(
                QueueItemType::PhotoUpload,
                photo_payload(target, path),
            ))
        })
        .collect()
}

fn photo_payload(target: &PhotoTarget, path: &Path) -> Payload {
    let mut payload = Payload::new();
    payload.insert("tourneeId".into(), Value::String(target.tour_id.clone()));
    payload.insert("pointId".into(), Value::String(target.point_id.clone()));
    payload.insert(
        "filePath".into(),
        Value::String(path.to_string_lossy().to_string()),
    );
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(status: PhotoStatus) -> PhotoItem {
        let mut item = PhotoItem::new(
            PhotoFile::new("a.jpg", "image/jpeg", vec![1u8]),
            String::new(),
        );
        item.status = status;
        item
    }

    #[test]
    fn test_failed_photos_are_queued_with_their_source() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut queue = OfflineQueue::load(store);
        let target = PhotoTarget::new("12", "7");

        let failed = item(PhotoStatus::Error);
        let done = item(PhotoStatus::Done);
        let sources = vec![
            (failed.id, PathBuf::from("/photos/failed.jpg")),
            (done.id, PathBuf::from("/photos/done.jpg")),
        ];

        let ids = queue_failed_photos(&mut queue, &target, &[failed, done], &sources);

        assert_eq!(ids.len(), 1);
        let queued = queue.get(&ids[0]).unwrap();
        assert_eq!(queued.item_type, QueueItemType::PhotoUpload);
        assert_eq!(queued.payload_str("filePath"), Some("/photos/failed.jpg"));
        assert_eq!(queued.payload_id("tourneeId").as_deref(), Some("12"));
        assert_eq!(queued.payload_id("pointId").as_deref(), Some("7"));
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.jpg");
        std::fs::write(&good, [0xFFu8, 0xD8, 0xFF, 0xE0]).unwrap();

        let files = read_photo_files(&[good.clone(), dir.path().join("missing.jpg")]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0, good);
        assert_eq!(files[0].1.mime, "image/jpeg");
    }
}
