use crate::compress::compress_photo;
use crate::models::{CompressionConfig, PhotoFile, PhotoItem, PhotoStatus, PhotoTarget};
use crate::transport::{preview_data_url, PhotoTransport, ProgressCallback};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use uuid::Uuid;

type Subscriber = Box<dyn Fn(&[PhotoItem]) + Send>;

/// Handle returned by [`PhotoPipeline::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Shared {
    photos: Mutex<Vec<PhotoItem>>,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl Shared {
    fn photos(&self) -> MutexGuard<'_, Vec<PhotoItem>> {
        self.photos.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Applies `f` to the photo with `id`. Returns `None` when the photo is gone.
    fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut PhotoItem) -> R) -> Option<R> {
        let result = {
            let mut photos = self.photos();
            photos.iter_mut().find(|p| p.id == id).map(f)
        };
        if result.is_some() {
            self.notify();
        }
        result
    }

    /// Snapshot and delivery both happen under the subscriber lock, so
    /// subscribers see snapshots in the order they were taken. The list lock
    /// is released before delivery and callbacks may read the pipeline.
    fn notify(&self) {
        let subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let snapshot = self.photos().clone();
        for (_, callback) in subscribers.iter() {
            callback(&snapshot);
        }
    }
}

/// Upload session for the photos of one tour stop.
///
/// Every photo moves `pending → uploading → done`, or `uploading → error`
/// from where [`PhotoPipeline::retry_photo`] re-enters `uploading`. Uploads run
/// concurrently; each completion only touches its own entry.
pub struct PhotoPipeline<T: PhotoTransport> {
    target: PhotoTarget,
    transport: Arc<T>,
    compression: CompressionConfig,
    shared: Arc<Shared>,
}

impl<T: PhotoTransport> Clone for PhotoPipeline<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            transport: self.transport.clone(),
            compression: self.compression,
            shared: self.shared.clone(),
        }
    }
}

impl<T: PhotoTransport> PhotoPipeline<T> {
    pub fn new(target: PhotoTarget, transport: T, compression: CompressionConfig) -> Self {
        Self {
            target,
            transport: Arc::new(transport),
            compression,
            shared: Arc::new(Shared {
                photos: Mutex::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    pub fn target(&self) -> &PhotoTarget {
        &self.target
    }

    /// Snapshot of the current list, in insertion order
    pub fn photos(&self) -> Vec<PhotoItem> {
        self.shared.photos().clone()
    }

    pub fn photo(&self, id: Uuid) -> Option<PhotoItem> {
        self.shared.photos().iter().find(|p| p.id == id).cloned()
    }

    /// Server paths of all finished uploads, in insertion order
    pub fn server_paths(&self) -> Vec<String> {
        self.shared
            .photos()
            .iter()
            .filter_map(|p| p.server_path.clone())
            .collect()
    }

    /// True while any photo is still pending or uploading
    pub fn is_busy(&self) -> bool {
        self.shared.photos().iter().any(|p| !p.is_settled())
    }

    /// Register a callback that receives the full list after every change
    pub fn subscribe(&self, callback: impl Fn(&[PhotoItem]) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::SeqCst));
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|(sid, _)| *sid != id);
    }

    /// Adds photos to the session and starts their uploads.
    ///
    /// Each file is compressed (falling back to the original on failure),
    /// previewed and appended as `pending`. Returns once every upload has been
    /// spawned, not when they finish.
    pub async fn add_photos(&self, files: Vec<PhotoFile>) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(files.len());

        for original in files {
            let name = original.name.clone();
            let file = match compress_photo(original.clone(), self.compression).await {
                Ok(compressed) => compressed,
                Err(e) => {
                    log::warn!("Compression failed for {}, uploading original: {}", name, e);
                    original
                }
            };

            let preview = preview_data_url(&file);
            let item = PhotoItem::new(file, preview);
            ids.push(item.id);
            self.shared.photos().push(item);
            self.shared.notify();
        }

        for id in &ids {
            let pipeline = self.clone();
            let id = *id;
            tokio::spawn(async move {
                pipeline.upload_single_photo(id).await;
            });
        }

        ids
    }

    /// Uploads one photo and records the outcome on its entry. Returns
    /// whether an upload was started.
    ///
    /// Does nothing if the photo is unknown, already uploading, already done
    /// or no longer holds its file.
    pub async fn upload_single_photo(&self, id: Uuid) -> bool {
        let file = self.shared.update(id, |photo| {
            if matches!(photo.status, PhotoStatus::Uploading | PhotoStatus::Done) {
                return None;
            }
            let file = photo.file.clone()?;
            photo.status = PhotoStatus::Uploading;
            photo.progress = 0;
            photo.error = None;
            Some(file)
        });

        let Some(file) = file.flatten() else {
            log::debug!("Photo {} not eligible for upload", id);
            return false;
        };

        log::debug!("Uploading photo {} ({} bytes)", id, file.len());
        let progress = progress_callback(Arc::downgrade(&self.shared), id);
        let result = self.transport.upload(&self.target, file, progress).await;

        let updated = self.shared.update(id, |photo| match &result {
            Ok(path) => {
                photo.status = PhotoStatus::Done;
                photo.progress = 100;
                photo.server_path = Some(path.clone());
                photo.file = None;
            }
            Err(e) => {
                photo.status = PhotoStatus::Error;
                photo.error = Some(e.to_string());
            }
        });

        match (updated, result) {
            (None, _) => log::debug!("Photo {} was removed during upload, result ignored", id),
            (Some(()), Ok(path)) => log::info!("Uploaded photo {} to {}", id, path),
            (Some(()), Err(e)) => log::error!("Upload of photo {} failed: {}", id, e),
        }
        true
    }

    /// Removes a photo regardless of its state. An in-flight upload keeps
    /// running; its result is dropped.
    pub fn remove_photo(&self, id: Uuid) {
        let removed = {
            let mut photos = self.shared.photos();
            let before = photos.len();
            photos.retain(|p| p.id != id);
            photos.len() != before
        };
        if removed {
            self.shared.notify();
        }
    }

    /// Re-sends a failed photo. Returns `false` (and does nothing) unless the
    /// photo is in `error`, still holds its file and no other attempt started
    /// first.
    pub async fn retry_photo(&self, id: Uuid) -> bool {
        let eligible = self
            .photo(id)
            .map(|p| p.status == PhotoStatus::Error && p.file.is_some())
            .unwrap_or(false);

        if !eligible {
            log::debug!("Photo {} cannot be retried", id);
            return false;
        }

        self.upload_single_photo(id).await
    }
}

/// Progress updates only ever raise the stored value and are ignored once
/// the photo left `uploading` or was removed.
fn progress_callback(shared: Weak<Shared>, id: Uuid) -> ProgressCallback {
    Arc::new(move |percent| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.update(id, |photo| {
            if photo.status == PhotoStatus::Uploading {
                photo.progress = photo.progress.max(percent.min(100));
            }
        });
    })
}
