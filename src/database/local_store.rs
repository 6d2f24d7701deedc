//! Durable key/blob store on top of SQLite.
//!
//! Every value is a complete JSON document stored under a well-known key and
//! replaced as a whole on each save.

use crate::database;
use crate::error::AppError;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Offline action queue
pub const OFFLINE_QUEUE_KEY: &str = "optitour-offline-queue";
/// Copy of a queue blob that could not be fully read
pub const OFFLINE_QUEUE_BACKUP_KEY: &str = "optitour-offline-queue.corrupt";
/// Push-notification read state
pub const NOTIFICATIONS_KEY: &str = "optitour-notifications";
/// Persisted auth state (`{ "state": { "token": ... } }`)
pub const AUTH_KEY: &str = "optitour-auth";

/// Cloneable handle to the local blob store
#[derive(Clone)]
pub struct LocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl LocalStore {
    pub fn open(db_path: &Path) -> Result<Self, AppError> {
        Ok(Self::from_connection(database::init_database(db_path)?))
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Ok(Self::from_connection(database::init_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Raw JSON text stored under `key`
    pub fn load_raw(&self, key: &str) -> Result<Option<String>, AppError> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM local_store WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn load_blob<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        match self.load_raw(key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Replaces the blob stored under `key`
    pub fn save_blob<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let json = serde_json::to_string(value)?;
        self.save_raw(key, &json)
    }

    /// Stores `value` verbatim under `key`
    pub fn save_raw(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.conn().execute(
            "INSERT INTO local_store (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn remove_blob(&self, key: &str) -> Result<(), AppError> {
        self.conn()
            .execute("DELETE FROM local_store WHERE key = ?1", params![key])?;
        Ok(())
    }
}
