use serde::{Deserialize, Serialize};

/// A received push notification and its read state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    /// Epoch milliseconds
    pub received_at: i64,
    pub read: bool,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
            received_at: chrono::Utc::now().timestamp_millis(),
            read: false,
        }
    }
}
