use crate::database::local_store::{LocalStore, AUTH_KEY};
use crate::error::AppError;
use serde_json::{json, Value};

/// Reads the bearer token from the persisted auth blob (`state.token`).
///
/// Missing blob, missing field or unreadable JSON all yield `None`; callers
/// then send their requests unauthenticated.
pub fn read_token(store: &LocalStore) -> Option<String> {
    let blob = match store.load_blob::<Value>(AUTH_KEY) {
        Ok(blob) => blob?,
        Err(e) => {
            log::warn!("Auth state unreadable: {}", e);
            return None;
        }
    };

    blob.get("state")?
        .get("token")?
        .as_str()
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Stores `token`, keeping any other fields of the auth blob
pub fn save_token(store: &LocalStore, token: &str) -> Result<(), AppError> {
    let mut blob = store
        .load_blob::<Value>(AUTH_KEY)
        .ok()
        .flatten()
        .filter(Value::is_object)
        .unwrap_or_else(|| json!({}));

    if !blob.get("state").map(Value::is_object).unwrap_or(false) {
        blob["state"] = json!({});
    }
    blob["state"]["token"] = Value::String(token.to_string());

    store.save_blob(AUTH_KEY, &blob)
}

pub fn clear_token(store: &LocalStore) -> Result<(), AppError> {
    store.remove_blob(AUTH_KEY)
}
