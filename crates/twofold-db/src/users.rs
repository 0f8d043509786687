use rusqlite::{Connection, ErrorCode, OptionalExtension};
use uuid::Uuid;

use twofold_types::models::User;

use crate::models::{UserRow, format_timestamp, now_micros};
use crate::{Database, StoreError, StoreResult};

pub struct NewUser<'a> {
    pub id: Uuid,
    pub username: &'a str,
    pub password_hash: &'a str,
    pub social_name: &'a str,
    pub professional_name: &'a str,
}

impl Database {
    /// Insert a user. A taken username is `Conflict`, even when a concurrent
    /// registration got past the caller's own lookup first.
    pub fn create_user(&self, user: &NewUser<'_>) -> StoreResult<()> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users
                 (id, username, password, social_name, professional_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    user.id.to_string(),
                    user.username,
                    user.password_hash,
                    user.social_name,
                    user.professional_name,
                    format_timestamp(now_micros()),
                ],
            );
            match inserted {
                Ok(_) => Ok(()),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict("username"))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Returns the user together with the stored password hash.
    pub fn get_user_credentials(&self, username: &str) -> StoreResult<Option<(User, String)>> {
        self.with_conn(|conn| {
            let row = query_user(conn, "username", username)?;
            row.map(|row| {
                let password = row.password.clone();
                Ok((row.into_user()?, password))
            })
            .transpose()
        })
    }

    pub fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.with_conn(|conn| {
            query_user(conn, "id", &id.to_string())?
                .map(UserRow::into_user)
                .transpose()
        })
    }

    pub fn require_user(&self, id: Uuid) -> StoreResult<User> {
        self.get_user(id)?.ok_or(StoreError::NotFound("user"))
    }
}

pub(crate) fn user_exists(conn: &Connection, id: Uuid) -> StoreResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM users WHERE id = ?1", [id.to_string()], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// `column` is always a literal from this module, never caller input.
fn query_user(conn: &Connection, column: &str, value: &str) -> StoreResult<Option<UserRow>> {
    let sql = format!(
        "SELECT id, username, password, social_name, professional_name, created_at
         FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                password: row.get(2)?,
                social_name: row.get(3)?,
                professional_name: row.get(4)?,
                created_at: row.get(5)?,
            })
        })
        .optional()?;

    Ok(row)
}
