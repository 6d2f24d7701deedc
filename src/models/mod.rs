pub mod notification;
pub mod queue_item;

pub use notification::Notification;
pub use queue_item::{QueueItem, QueueItemType};
