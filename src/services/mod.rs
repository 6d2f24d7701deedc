pub mod api_client;
pub mod auth_service;
pub mod notification_service;
pub mod offline_queue;
pub mod photo_service;
pub mod replay_service;

pub use notification_service::NotificationStore;
pub use offline_queue::{OfflineQueue, SharedQueue};
pub use replay_service::{ReplayHandler, ReplayReport, ReplayService, RetryPolicy};
