use crate::database::local_store::{LocalStore, NOTIFICATIONS_KEY};
use crate::models::Notification;

/// Oldest entries beyond this are dropped
const MAX_NOTIFICATIONS: usize = 100;

/// Push notifications and their read state, newest first
pub struct NotificationStore {
    items: Vec<Notification>,
    store: LocalStore,
}

impl NotificationStore {
    pub fn load(store: LocalStore) -> Self {
        let items = store
            .load_blob::<Vec<Notification>>(NOTIFICATIONS_KEY)
            .unwrap_or_else(|e| {
                log::error!("Notification state unreadable, starting empty: {}", e);
                None
            })
            .unwrap_or_default();
        Self { items, store }
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// Records a received notification and returns its id
    pub fn add(&mut self, title: &str, body: &str) -> String {
        let notification = Notification::new(title, body);
        let id = notification.id.clone();
        self.items.insert(0, notification);
        self.items.truncate(MAX_NOTIFICATIONS);
        self.save();
        id
    }

    /// Returns false if no notification has this id
    pub fn mark_read(&mut self, id: &str) -> bool {
        match self.items.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                self.save();
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn mark_all_read(&mut self) {
        if self.items.iter().any(|n| !n.read) {
            self.items.iter_mut().for_each(|n| n.read = true);
            self.save();
        }
    }

    pub fn remove(&mut self, id: &str) {
        let before = self.items.len();
        self.items.retain(|n| n.id != id);
        if self.items.len() != before {
            self.save();
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.save();
    }

    fn save(&self) {
        if let Err(e) = self.store.save_blob(NOTIFICATIONS_KEY, &self.items) {
            log::error!("Failed to persist notifications: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_state_persists() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut notifications = NotificationStore::load(store.clone());
        let first = notifications.add("Tour 12", "New stop added");
        notifications.add("Tour 12", "Stop 3 moved");
        assert_eq!(notifications.unread_count(), 2);
        assert_eq!(notifications.items()[1].id, first);

        assert!(notifications.mark_read(&first));
        assert!(!notifications.mark_read("missing"));

        let reloaded = NotificationStore::load(store);
        assert_eq!(reloaded.unread_count(), 1);
        assert!(reloaded.items()[1].read);
    }

    #[test]
    fn test_mark_all_remove_clear_and_cap() {
        let store = LocalStore::open_in_memory().unwrap();
        let mut notifications = NotificationStore::load(store.clone());
        for i in 0..(MAX_NOTIFICATIONS + 5) {
            notifications.add("n", &i.to_string());
        }
        assert_eq!(notifications.items().len(), MAX_NOTIFICATIONS);
        assert_eq!(notifications.items()[0].body, (MAX_NOTIFICATIONS + 4).to_string());

        notifications.mark_all_read();
        assert_eq!(notifications.unread_count(), 0);

        let id = notifications.items()[0].id.clone();
        notifications.remove(&id);
        assert_eq!(notifications.items().len(), MAX_NOTIFICATIONS - 1);

        notifications.clear();
        assert!(NotificationStore::load(store).items().is_empty());
    }
}
