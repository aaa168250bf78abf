//! Storage collaborators consumed by the router.
//!
//! The router only needs two narrow capabilities: hand a message off for
//! durable storage, and resolve a room's member list. Both are synchronous
//! traits; callers run them on the blocking pool.

use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chat::message::ChatMessage;
use crate::db::DbPool;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] rusqlite_migration::Error),
    #[error("data directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database lock poisoned")]
    Poisoned,
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Read-only view of a room's membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: String,
    pub name: String,
    pub members: Vec<String>,
}

/// Durable message storage.
pub trait MessageStore: Send + Sync + 'static {
    /// Store a message and return it as stored (id and timestamp filled in).
    fn persist(&self, message: ChatMessage) -> Result<ChatMessage, StoreError>;
}

/// Room membership resolution.
pub trait RoomDirectory: Send + Sync + 'static {
    fn lookup_room(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError>;
}

/// Run a storage call on the blocking pool.
pub async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// SQLite-backed implementation of both collaborators.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Create a room if no room with this id exists yet. Returns the room as stored.
    pub fn ensure_room(
        &self,
        id: &str,
        name: &str,
        members: &[String],
    ) -> Result<RoomSnapshot, StoreError> {
        let mut conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = conn.transaction()?;

        let created = tx.execute(
            "INSERT OR IGNORE INTO rooms (id, name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![id, name, now_rfc3339()],
        )?;
        if created > 0 {
            for (position, member) in members.iter().enumerate() {
                tx.execute(
                    "INSERT OR IGNORE INTO room_members (room_id, username, position)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![id, member, position as i64],
                )?;
            }
        }
        tx.commit()?;
        drop(conn);

        self.lookup_room(id)?.ok_or(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Fetch a stored message by id.
    pub fn message(&self, id: &str) -> Result<Option<ChatMessage>, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        let message = conn
            .query_row(
                "SELECT id, sender, receiver, room_id, content, type, timestamp,
                        file_url, file_name, file_type, file_size
                 FROM messages WHERE id = ?1",
                rusqlite::params![id],
                |row| {
                    Ok(ChatMessage {
                        id: row.get(0)?,
                        sender: row.get(1)?,
                        receiver: row.get(2)?,
                        room_id: row.get(3)?,
                        content: row.get(4)?,
                        kind: row.get(5)?,
                        timestamp: row.get(6)?,
                        file_url: row.get(7)?,
                        file_name: row.get(8)?,
                        file_type: row.get(9)?,
                        file_size: row.get(10)?,
                    })
                },
            )
            .optional()?;
        Ok(message)
    }
}

impl MessageStore for SqliteStore {
    fn persist(&self, mut message: ChatMessage) -> Result<ChatMessage, StoreError> {
        if message.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            message.id = Some(Uuid::now_v7().to_string());
        }
        if message.timestamp.as_deref().map_or(true, |ts| ts.trim().is_empty()) {
            message.timestamp = Some(now_rfc3339());
        }

        let conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO messages
                (id, sender, receiver, room_id, content, type, timestamp,
                 file_url, file_name, file_type, file_size)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                message.id,
                message.sender,
                message.receiver,
                message.room_id,
                message.content,
                message.kind,
                message.timestamp,
                message.file_url,
                message.file_name,
                message.file_type,
                message.file_size,
            ],
        )?;

        Ok(message)
    }
}

impl RoomDirectory for SqliteStore {
    fn lookup_room(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError> {
        let conn = self.db.lock().map_err(|_| StoreError::Poisoned)?;

        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM rooms WHERE id = ?1",
                rusqlite::params![room_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT username FROM room_members WHERE room_id = ?1 ORDER BY position",
        )?;
        let members = stmt
            .query_map(rusqlite::params![room_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RoomSnapshot {
            id: room_id.to_string(),
            name,
            members,
        }))
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
