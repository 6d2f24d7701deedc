//! Durable FIFO of side effects captured while offline.
//!
//! Every effective mutation writes the whole list back to the local store
//! before subscribers are told about it. Items leave the queue only through
//! [`OfflineQueue::remove`] or [`OfflineQueue::clear`].

use crate::database::local_store::{LocalStore, OFFLINE_QUEUE_BACKUP_KEY, OFFLINE_QUEUE_KEY};
use crate::models::queue_item::Payload;
use crate::models::{QueueItem, QueueItemType};
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// Queue shared between the UI side and the replay driver
pub type SharedQueue = Arc<Mutex<OfflineQueue>>;

type Subscriber = Box<dyn Fn(&[QueueItem]) + Send>;

/// Handle returned by [`OfflineQueue::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct OfflineQueue {
    items: Vec<QueueItem>,
    store: LocalStore,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl OfflineQueue {
    /// Restores the queue from the local store. Items that cannot be read
    /// (unknown type, missing fields) are skipped; the stored blob is then
    /// copied to a backup key before anything overwrites it. A missing blob
    /// starts an empty queue.
    pub fn load(store: LocalStore) -> Self {
        let items = match store.load_raw(OFFLINE_QUEUE_KEY) {
            Ok(Some(raw)) => restore_items(&store, &raw),
            Ok(None) => Vec::new(),
            Err(e) => {
                log::error!("Offline queue unreadable, starting empty: {}", e);
                Vec::new()
            }
        };

        Self {
            items,
            store,
            subscribers: Vec::new(),
            next_subscription: 1,
        }
    }

    pub fn into_shared(self) -> SharedQueue {
        Arc::new(Mutex::new(self))
    }

    /// Appends a new item and returns its id. Never fails: a persistence
    /// error is logged and the in-memory queue stays authoritative.
    pub fn enqueue(&mut self, item_type: QueueItemType, payload: Payload) -> String {
        let item = QueueItem::new(item_type, payload);
        let id = item.id.clone();
        log::debug!("Queued {} ({})", item_type, id);
        self.items.push(item);
        self.changed();
        id
    }

    /// Removes the item if present; unknown ids are ignored
    pub fn remove(&mut self, id: &str) {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        if self.items.len() != before {
            self.changed();
        }
    }

    /// Bumps the retry counter of the item; unknown ids are ignored
    pub fn increment_retries(&mut self, id: &str) {
        if let Some(item) = self.items.iter_mut().find(|item| item.id == id) {
            item.retries += 1;
            self.changed();
        }
    }

    /// Drops every item (e.g. on logout)
    pub fn clear(&mut self) {
        self.items.clear();
        self.changed();
    }

    /// Items of one type, in insertion order
    pub fn list_by_type(&self, item_type: QueueItemType) -> Vec<QueueItem> {
        self.items
            .iter()
            .filter(|item| item.item_type == item_type)
            .cloned()
            .collect()
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Register a callback that receives the full list after every change
    pub fn subscribe(&mut self, callback: impl Fn(&[QueueItem]) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(callback)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.retain(|(sid, _)| *sid != id);
    }

    fn changed(&self) {
        if let Err(e) = self.store.save_blob(OFFLINE_QUEUE_KEY, &self.items) {
            log::error!("Failed to persist offline queue: {}", e);
        }
        for (_, callback) in &self.subscribers {
            callback(&self.items);
        }
    }
}

fn restore_items(store: &LocalStore, raw: &str) -> Vec<QueueItem> {
    let entries = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            log::error!("Offline queue blob is not a list, starting empty");
            backup_blob(store, raw);
            return Vec::new();
        }
        Err(e) => {
            log::error!("Offline queue blob is not valid JSON, starting empty: {}", e);
            backup_blob(store, raw);
            return Vec::new();
        }
    };

    let total = entries.len();
    let items: Vec<QueueItem> = entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<QueueItem>(entry.clone()) {
            Ok(item) => Some(item),
            Err(e) => {
                log::warn!("Skipping unreadable queued item {}: {}", entry, e);
                None
            }
        })
        .collect();

    if items.len() != total {
        log::error!(
            "Restored {} of {} queued offline actions, the rest kept in {}",
            items.len(),
            total,
            OFFLINE_QUEUE_BACKUP_KEY
        );
        backup_blob(store, raw);
    } else if total > 0 {
        log::info!("Restored {} queued offline actions", total);
    }
    items
}

fn backup_blob(store: &LocalStore, raw: &str) {
    if let Err(e) = store.save_raw(OFFLINE_QUEUE_BACKUP_KEY, raw) {
        log::error!("Failed to back up offline queue blob: {}", e);
    }
}
