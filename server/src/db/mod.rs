pub mod migrations;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::store::StoreError;

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so it sits behind Arc<Mutex> and is only touched
/// from tokio::task::spawn_blocking.
pub type DbPool = Arc<Mutex<Connection>>;

/// Initialize the SQLite database: create data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, StoreError> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join("courier.db");
    let mut conn = Connection::open(&db_path)?;

    // WAL keeps history readers from blocking message inserts
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Database initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}

/// Open a migrated in-memory database. Used by tests and throwaway runs.
pub fn open_in_memory() -> Result<DbPool, StoreError> {
    let mut conn = Connection::open_in_memory()?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    migrations::migrations().to_latest(&mut conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        assert!(migrations::migrations().validate().is_ok());
    }

    #[test]
    fn test_init_db_creates_file() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested");
        let dir = dir.to_str().unwrap();

        init_db(dir).unwrap();
        assert!(Path::new(dir).join("courier.db").exists());
        // Re-opening an already migrated database is fine.
        init_db(dir).unwrap();
    }

    #[test]
    fn test_init_db_rejects_file_as_data_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"").unwrap();

        let err = init_db(file.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
