pub mod local_store;
pub mod schema;

pub use local_store::LocalStore;

use crate::error::AppError;
use crate::filesystem;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Default database location inside the app data directory
pub fn get_database_path() -> PathBuf {
    filesystem::get_app_data_dir().join("optitour-booth.db")
}

/// Opens (and creates if needed) the database at `db_path` with the full schema
pub fn init_database(db_path: &Path) -> Result<Connection, AppError> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;
    schema::init_schema(&conn)?;

    log::debug!("Database ready at {}", db_path.display());
    Ok(conn)
}

/// In-memory database with the full schema, used by tests and dry runs
pub fn init_in_memory() -> Result<Connection, AppError> {
    let conn = Connection::open_in_memory()?;
    schema::init_schema(&conn)?;
    Ok(conn)
}
