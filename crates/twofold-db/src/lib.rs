pub mod messages;
pub mod migrations;
pub mod models;
pub mod rooms;
pub mod users;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("not a participant of this room")]
    Forbidden,

    #[error("{0}")]
    Validation(String),

    #[error("{0} already exists")]
    Conflict(&'static str),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(err.into())
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// SQLite store backing users, the room directory and the message log.
/// One connection behind a mutex: every write is serialized.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;

        let db = Self::init(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> StoreResult<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use uuid::Uuid;

    use crate::Database;
    use crate::users::NewUser;

    pub fn seed_user(db: &Database, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(&NewUser {
            id,
            username,
            password_hash: "not-a-real-hash",
            social_name: username,
            professional_name: username,
        })
        .unwrap();
        id
    }
}
