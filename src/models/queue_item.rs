use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of side effect a queued item represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueItemType {
    GpsPosition,
    PhotoUpload,
    PointCompletion,
}

impl QueueItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueItemType::GpsPosition => "gps-position",
            QueueItemType::PhotoUpload => "photo-upload",
            QueueItemType::PointCompletion => "point-completion",
        }
    }

    pub fn all() -> [QueueItemType; 3] {
        [
            QueueItemType::GpsPosition,
            QueueItemType::PhotoUpload,
            QueueItemType::PointCompletion,
        ]
    }
}

impl fmt::Display for QueueItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gps-position" => Ok(QueueItemType::GpsPosition),
            "photo-upload" => Ok(QueueItemType::PhotoUpload),
            "point-completion" => Ok(QueueItemType::PointCompletion),
            other => Err(format!("Unknown queue item type: {}", other)),
        }
    }
}

/// Field name → value, interpreted only by the replay handler
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// A pending side effect waiting to reach the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    #[serde(rename = "type")]
    pub item_type: QueueItemType,
    pub payload: Payload,
    pub retries: u32,
    /// Epoch milliseconds
    pub created_at: i64,
}

impl QueueItem {
    /// New item stamped with the current time and a fresh id
    pub fn new(item_type: QueueItemType, payload: Payload) -> Self {
        let created_at = chrono::Utc::now().timestamp_millis();
        Self {
            id: generate_id(item_type, created_at),
            item_type,
            payload,
            retries: 0,
            created_at,
        }
    }

    /// String field of the payload, if present
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }

    /// Payload field rendered as a path segment (accepts strings and numbers)
    pub fn payload_id(&self, field: &str) -> Option<String> {
        match self.payload.get(field)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `{type}-{epoch_ms}-{9 random base36 chars}`
fn generate_id(item_type: QueueItemType, created_at: i64) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..9)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect();
    format!("{}-{}-{}", item_type, created_at, suffix)
}
