//! Replays queued offline actions against the backend.
//!
//! Per-type strategy:
//! - gps-position: only the newest ping is sent; its success acknowledges
//!   every older ping
//! - point-completion: strict FIFO, a failure or a waiting item holds back
//!   the later ones
//! - photo-upload: one at a time in FIFO order, failures do not block others
//!
//! Items that reached `max_retries` are parked: they stay queued, are no
//! longer sent and show up in every [`ReplayReport`].

use crate::error::AppError;
use crate::models::{QueueItem, QueueItemType};
use crate::services::offline_queue::{OfflineQueue, SharedQueue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Replay limits and pacing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after which an item is parked
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Pause between background cycles
    pub interval_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 10,
            backoff_base_ms: 5_000,
            backoff_max_ms: 300_000,
            interval_secs: 30,
        }
    }
}

impl RetryPolicy {
    /// Wait required after `retries` failed attempts: base * 2^(retries-1), capped
    pub fn backoff_for(&self, retries: u32) -> Duration {
        if retries == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (retries - 1).min(20);
        Duration::from_millis(
            self.backoff_base_ms
                .saturating_mul(factor)
                .min(self.backoff_max_ms),
        )
    }

    pub fn is_parked(&self, item: &QueueItem) -> bool {
        item.retries >= self.max_retries
    }
}

/// Sends one queued item to the backend
#[async_trait]
pub trait ReplayHandler: Send + Sync + 'static {
    async fn replay(&self, item: &QueueItem) -> Result<(), AppError>;
}

/// Outcome of one replay cycle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplayReport {
    pub sent: usize,
    /// Older gps pings acknowledged by a newer one
    pub coalesced: usize,
    pub failed: usize,
    /// Still inside their backoff window, or held back behind one
    pub skipped: usize,
    pub parked: usize,
    pub finished_at_ms: i64,
}

enum Readiness {
    Ready,
    Waiting,
    Parked,
}

pub struct ReplayService<H: ReplayHandler> {
    queue: SharedQueue,
    handler: H,
    policy: RetryPolicy,
    /// Epoch ms of the last failed attempt per item (volatile)
    last_failure: Mutex<HashMap<String, i64>>,
    running: AtomicBool,
    reports: watch::Sender<ReplayReport>,
}

impl<H: ReplayHandler> ReplayService<H> {
    pub fn new(queue: SharedQueue, handler: H, policy: RetryPolicy) -> Self {
        let (reports, _rx) = watch::channel(ReplayReport::default());
        Self {
            queue,
            handler,
            policy,
            last_failure: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            reports,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Subscribe to the report of every finished cycle; the latest one is
    /// available immediately
    pub fn subscribe_reports(&self) -> watch::Receiver<ReplayReport> {
        self.reports.subscribe()
    }

    fn queue(&self) -> MutexGuard<'_, OfflineQueue> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn failures(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.last_failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs one replay cycle over the whole queue
    pub async fn run_once(&self) -> ReplayReport {
        self.run_once_at(chrono::Utc::now().timestamp_millis()).await
    }

    async fn run_once_at(&self, now_ms: i64) -> ReplayReport {
        let mut report = ReplayReport::default();

        self.replay_gps(now_ms, &mut report).await;
        self.replay_point_completions(now_ms, &mut report).await;
        self.replay_photo_uploads(now_ms, &mut report).await;

        report.finished_at_ms = chrono::Utc::now().timestamp_millis();
        if report.sent + report.failed > 0 || report.parked > 0 {
            log::info!("Replay cycle finished: {:?}", report);
        } else {
            log::debug!("Replay cycle finished: {:?}", report);
        }
        self.reports.send_replace(report.clone());
        report
    }

    fn readiness(&self, item: &QueueItem, now_ms: i64) -> Readiness {
        if self.policy.is_parked(item) {
            return Readiness::Parked;
        }
        let Some(last) = self.failures().get(&item.id).copied() else {
            return Readiness::Ready;
        };
        let wait = self.policy.backoff_for(item.retries).as_millis() as i64;
        if now_ms - last >= wait {
            Readiness::Ready
        } else {
            Readiness::Waiting
        }
    }

    /// Sends `item`, acknowledging `acknowledged` on success. Returns whether it succeeded.
    async fn attempt(
        &self,
        item: &QueueItem,
        acknowledged: &[String],
        now_ms: i64,
        report: &mut ReplayReport,
    ) -> bool {
        match self.handler.replay(item).await {
            Ok(()) => {
                let mut queue = self.queue();
                let mut failures = self.failures();
                for id in acknowledged {
                    queue.remove(id);
                    failures.remove(id);
                }
                report.sent += 1;
                log::debug!("Replayed {}", item.id);
                true
            }
            Err(e) => {
                self.queue().increment_retries(&item.id);
                self.failures().insert(item.id.clone(), now_ms);
                report.failed += 1;

                let retries = item.retries + 1;
                if retries >= self.policy.max_retries {
                    log::error!(
                        "Replay of {} failed {} times, parking it: {}",
                        item.id,
                        retries,
                        e
                    );
                } else {
                    log::warn!(
                        "Replay of {} failed (attempt {}/{}): {}",
                        item.id,
                        retries,
                        self.policy.max_retries,
                        e
                    );
                }
                false
            }
        }
    }

    async fn replay_gps(&self, now_ms: i64, report: &mut ReplayReport) {
        let pings = self.queue().list_by_type(QueueItemType::GpsPosition);
        let Some(latest) = pings.last() else {
            return;
        };

        match self.readiness(latest, now_ms) {
            Readiness::Parked => report.parked += pings.len(),
            Readiness::Waiting => report.skipped += pings.len(),
            Readiness::Ready => {
                let ids: Vec<String> = pings.iter().map(|p| p.id.clone()).collect();
                if self.attempt(latest, &ids, now_ms, report).await {
                    report.coalesced += ids.len() - 1;
                } else {
                    report.skipped += ids.len() - 1;
                }
            }
        }
    }

    async fn replay_point_completions(&self, now_ms: i64, report: &mut ReplayReport) {
        let completions = self.queue().list_by_type(QueueItemType::PointCompletion);

        for (index, item) in completions.iter().enumerate() {
            let remaining = completions.len() - index - 1;
            match self.readiness(item, now_ms) {
                Readiness::Ready => {
                    if !self
                        .attempt(item, std::slice::from_ref(&item.id), now_ms, report)
                        .await
                    {
                        report.skipped += remaining;
                        return;
                    }
                }
                Readiness::Waiting => {
                    report.skipped += 1 + remaining;
                    return;
                }
                Readiness::Parked => {
                    report.parked += 1;
                    report.skipped += remaining;
                    return;
                }
            }
        }
    }

    async fn replay_photo_uploads(&self, now_ms: i64, report: &mut ReplayReport) {
        let uploads = self.queue().list_by_type(QueueItemType::PhotoUpload);

        for item in &uploads {
            match self.readiness(item, now_ms) {
                Readiness::Ready => {
                    self.attempt(item, std::slice::from_ref(&item.id), now_ms, report)
                        .await;
                }
                Readiness::Waiting => report.skipped += 1,
                Readiness::Parked => report.parked += 1,
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the background loop after its current cycle
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            log::info!("Stopping offline replay");
        }
    }
}

impl<H: ReplayHandler> ReplayService<H> {
    /// Starts replaying in the background every `policy.interval_secs`.
    /// Call [`ReplayService::stop`] to end it.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            log::warn!("Offline replay already running");
            return;
        }

        let interval = Duration::from_secs(self.policy.interval_secs.max(1));
        log::info!(
            "Starting offline replay with {} second interval",
            interval.as_secs()
        );

        let service = Arc::clone(self);
        std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to create replay runtime: {}", e);
                    service.running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            while service.is_running() {
                runtime.block_on(async {
                    service.run_once().await;
                    tokio::time::sleep(interval).await;
                });
            }

            log::info!("Offline replay stopped");
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::LocalStore;
    use crate::models::queue_item::Payload;
    use serde_json::json;
    use std::collections::HashSet;

    /// Fails every item whose id is in `failing`, records everything it was asked to send
    #[derive(Default)]
    struct FakeHandler {
        failing: Mutex<HashSet<String>>,
        fail_all: AtomicBool,
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ReplayHandler for FakeHandler {
        async fn replay(&self, item: &QueueItem) -> Result<(), AppError> {
            self.sent.lock().unwrap().push(item.id.clone());
            if self.fail_all.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&item.id) {
                Err(AppError::Http("offline".into()))
            } else {
                Ok(())
            }
        }
    }

    fn setup(policy: RetryPolicy) -> (SharedQueue, ReplayService<FakeHandler>) {
        let store = LocalStore::open_in_memory().unwrap();
        let queue = OfflineQueue::load(store).into_shared();
        let service = ReplayService::new(queue.clone(), FakeHandler::default(), policy);
        (queue, service)
    }

    fn enqueue(queue: &SharedQueue, t: QueueItemType, value: serde_json::Value) -> String {
        let payload: Payload = value.as_object().cloned().unwrap_or_default();
        queue.lock().unwrap().enqueue(t, payload)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            backoff_base_ms: 1000,
            backoff_max_ms: 5000,
            ..Default::default()
        };
        assert_eq!(policy.backoff_for(0), Duration::ZERO);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(4000));
        assert_eq!(policy.backoff_for(4), Duration::from_millis(5000));
        assert_eq!(policy.backoff_for(60), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn test_gps_pings_are_coalesced() {
        let (queue, service) = setup(RetryPolicy::default());
        enqueue(&queue, QueueItemType::GpsPosition, json!({"lat": 1}));
        enqueue(&queue, QueueItemType::GpsPosition, json!({"lat": 2}));
        let latest = enqueue(&queue, QueueItemType::GpsPosition, json!({"lat": 3}));

        let report = service.run_once().await;

        assert_eq!(report.sent, 1);
        assert_eq!(report.coalesced, 2);
        assert_eq!(*service.handler.sent.lock().unwrap(), vec![latest]);
        assert!(queue.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_point_completion_failure_holds_back_later_ones() {
        let (queue, service) = setup(RetryPolicy::default());
        let first = enqueue(&queue, QueueItemType::PointCompletion, json!({"pointId": 1}));
        let second = enqueue(&queue, QueueItemType::PointCompletion, json!({"pointId": 2}));
        service.handler.failing.lock().unwrap().insert(first.clone());

        let report = service.run_once().await;

        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(*service.handler.sent.lock().unwrap(), vec![first.clone()]);
        let q = queue.lock().unwrap();
        assert_eq!(q.get(&first).unwrap().retries, 1);
        assert_eq!(q.get(&second).unwrap().retries, 0);
    }

    #[tokio::test]
    async fn test_photo_upload_failure_does_not_block_others() {
        let (queue, service) = setup(RetryPolicy::default());
        let a = enqueue(&queue, QueueItemType::PhotoUpload, json!({"filePath": "a"}));
        let b = enqueue(&queue, QueueItemType::PhotoUpload, json!({"filePath": "b"}));
        service.handler.failing.lock().unwrap().insert(a.clone());

        let report = service.run_once().await;

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        let q = queue.lock().unwrap();
        assert!(q.get(&b).is_none());
        assert_eq!(q.get(&a).unwrap().retries, 1);
    }

    #[tokio::test]
    async fn test_backoff_window_skips_then_retries() {
        let policy = RetryPolicy {
            backoff_base_ms: 1_000,
            ..Default::default()
        };
        let (queue, service) = setup(policy);
        let id = enqueue(&queue, QueueItemType::PhotoUpload, json!({}));
        service.handler.fail_all.store(true, Ordering::SeqCst);

        let report = service.run_once_at(10_000).await;
        assert_eq!(report.failed, 1);

        let report = service.run_once_at(10_500).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);

        service.handler.fail_all.store(false, Ordering::SeqCst);
        let report = service.run_once_at(11_000).await;
        assert_eq!(report.sent, 1);
        assert!(queue.lock().unwrap().get(&id).is_none());
    }

    #[tokio::test]
    async fn test_exhausted_items_are_parked_not_dropped() {
        let policy = RetryPolicy {
            max_retries: 2,
            backoff_base_ms: 0,
            ..Default::default()
        };
        let (queue, service) = setup(policy);
        let id = enqueue(&queue, QueueItemType::PhotoUpload, json!({}));
        service.handler.fail_all.store(true, Ordering::SeqCst);

        service.run_once().await;
        service.run_once().await;
        let report = service.run_once().await;

        assert_eq!(report.parked, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(service.handler.sent.lock().unwrap().len(), 2);
        assert_eq!(queue.lock().unwrap().get(&id).unwrap().retries, 2);
    }

    #[tokio::test]
    async fn test_reports_are_published() {
        let (queue, service) = setup(RetryPolicy::default());
        let mut rx = service.subscribe_reports();
        enqueue(&queue, QueueItemType::PointCompletion, json!({"pointId": 9}));

        service.run_once().await;

        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().sent, 1);
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_latest_report() {
        let (queue, service) = setup(RetryPolicy::default());
        enqueue(&queue, QueueItemType::GpsPosition, json!({"lat": 1}));

        service.run_once().await;

        let rx = service.subscribe_reports();
        assert_eq!(rx.borrow().sent, 1);
        assert!(rx.borrow().finished_at_ms > 0);
    }
}
