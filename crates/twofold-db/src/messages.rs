use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use twofold_types::models::Message;

use crate::models::{MessageRow, format_timestamp, now_micros};
use crate::rooms::query_room;
use crate::users::user_exists;
use crate::{Database, StoreError, StoreResult};

impl Database {
    pub fn append_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        text: &str,
    ) -> StoreResult<Message> {
        self.append_message_then(room_id, sender_id, text, |_| {})
    }

    /// Appends a message and runs `on_appended` before the writer lock is
    /// released. Anything `on_appended` does is therefore ordered exactly like
    /// the appends themselves.
    pub fn append_message_then<F>(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        text: &str,
        on_appended: F,
    ) -> StoreResult<Message>
    where
        F: FnOnce(&Message),
    {
        let text = text.trim();
        if text.is_empty() {
            return Err(StoreError::Validation("message text must not be empty".into()));
        }

        self.with_conn(|conn| {
            let room = query_room(conn, room_id)?
                .ok_or(StoreError::NotFound("room"))?
                .into_room()?;
            if !user_exists(conn, sender_id)? {
                return Err(StoreError::NotFound("sender"));
            }
            if !room.has_participant(sender_id) {
                return Err(StoreError::Forbidden);
            }

            let message = Message {
                id: Uuid::new_v4(),
                room_id,
                sender_id,
                text: text.to_string(),
                created_at: now_micros(),
            };
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    message.id.to_string(),
                    room_id.to_string(),
                    sender_id.to_string(),
                    message.text,
                    format_timestamp(message.created_at),
                ],
            )?;

            on_appended(&message);
            Ok(message)
        })
    }

    /// Full history of a room, oldest first. Ties on `created_at` fall back
    /// to insertion order.
    pub fn list_messages(&self, room_id: Uuid) -> StoreResult<Vec<Message>> {
        self.with_conn(|conn| {
            if query_room(conn, room_id)?.is_none() {
                return Err(StoreError::NotFound("room"));
            }
            query_messages(conn, room_id)
        })
    }

    /// Most recent message in a room, for conversation previews.
    pub fn latest_message(&self, room_id: Uuid) -> StoreResult<Option<Message>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, room_id, sender_id, body, created_at
                     FROM messages
                     WHERE room_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1",
                    [room_id.to_string()],
                    map_message_row,
                )
                .optional()?;
            row.map(MessageRow::into_message).transpose()
        })
    }
}

fn query_messages(conn: &Connection, room_id: Uuid) -> StoreResult<Vec<Message>> {
    let mut stmt = conn.prepare(
        "SELECT id, room_id, sender_id, body, created_at
         FROM messages
         WHERE room_id = ?1
         ORDER BY created_at ASC, rowid ASC",
    )?;

    let rows = stmt
        .query_map([room_id.to_string()], map_message_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(MessageRow::into_message).collect()
}

fn map_message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
    })
}
