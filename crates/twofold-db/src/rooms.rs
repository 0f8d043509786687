use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use uuid::Uuid;

use twofold_types::models::{Mode, Room};

use crate::models::{RoomRow, format_timestamp, now_micros, pair_key};
use crate::{Database, StoreError, StoreResult};

const ROOM_COLUMNS: &str = "id, participant_a, participant_b, mode, created_at";

impl Database {
    /// Returns the single room for this pair and mode, creating it if absent.
    /// Participant order does not matter for the lookup; a new room stores the
    /// requester first.
    pub fn find_or_create_room(
        &self,
        requester: Uuid,
        other: Uuid,
        mode: Mode,
    ) -> StoreResult<Room> {
        let key = pair_key(requester, other);

        self.with_conn(|conn| {
            if let Some(row) = query_room_by_pair(conn, &key, mode)? {
                return row.into_room();
            }

            let room = Room {
                id: Uuid::new_v4(),
                participants: [requester, other],
                mode,
                created_at: now_micros(),
            };
            conn.execute(
                "INSERT INTO rooms (id, participant_a, participant_b, pair_key, mode, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    room.id.to_string(),
                    requester.to_string(),
                    other.to_string(),
                    key,
                    mode.as_str(),
                    format_timestamp(room.created_at),
                ],
            )?;

            info!("Created {} room {} for {} and {}", mode, room.id, requester, other);
            Ok(room)
        })
    }

    pub fn get_room(&self, room_id: Uuid) -> StoreResult<Option<Room>> {
        self.with_conn(|conn| query_room(conn, room_id)?.map(RoomRow::into_room).transpose())
    }

    pub fn require_room(&self, room_id: Uuid) -> StoreResult<Room> {
        self.get_room(room_id)?.ok_or(StoreError::NotFound("room"))
    }

    /// Every room the user is in, across both modes. Newest first.
    pub fn list_rooms_for(&self, user_id: Uuid) -> StoreResult<Vec<Room>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM rooms
                 WHERE participant_a = ?1 OR participant_b = ?1
                 ORDER BY created_at DESC",
                ROOM_COLUMNS
            );
            collect_rooms(conn, &sql, rusqlite::params![user_id.to_string()])
        })
    }

    pub fn list_rooms_for_mode(&self, user_id: Uuid, mode: Mode) -> StoreResult<Vec<Room>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM rooms
                 WHERE (participant_a = ?1 OR participant_b = ?1) AND mode = ?2
                 ORDER BY created_at DESC",
                ROOM_COLUMNS
            );
            collect_rooms(conn, &sql, rusqlite::params![user_id.to_string(), mode.as_str()])
        })
    }

    /// Deletes the room and all its messages as one transaction.
    /// Messages go first; any failure rolls both back.
    pub fn delete_room(&self, room_id: Uuid, requesting_user: Uuid) -> StoreResult<()> {
        self.with_conn(|conn| {
            let room = query_room(conn, room_id)?
                .ok_or(StoreError::NotFound("room"))?
                .into_room()?;

            if !room.has_participant(requesting_user) {
                return Err(StoreError::Forbidden);
            }

            let tx = conn.unchecked_transaction()?;
            let removed =
                tx.execute("DELETE FROM messages WHERE room_id = ?1", [room_id.to_string()])?;
            tx.execute("DELETE FROM rooms WHERE id = ?1", [room_id.to_string()])?;
            tx.commit()?;

            info!(
                "Deleted room {} ({} messages) at request of {}",
                room_id, removed, requesting_user
            );
            Ok(())
        })
    }
}

pub(crate) fn query_room(conn: &Connection, room_id: Uuid) -> StoreResult<Option<RoomRow>> {
    let sql = format!("SELECT {} FROM rooms WHERE id = ?1", ROOM_COLUMNS);
    let row = conn
        .query_row(&sql, [room_id.to_string()], map_room_row)
        .optional()?;
    Ok(row)
}

fn query_room_by_pair(conn: &Connection, key: &str, mode: Mode) -> StoreResult<Option<RoomRow>> {
    let sql = format!("SELECT {} FROM rooms WHERE pair_key = ?1 AND mode = ?2", ROOM_COLUMNS);
    let row = conn
        .query_row(&sql, rusqlite::params![key, mode.as_str()], map_room_row)
        .optional()?;
    Ok(row)
}

fn collect_rooms(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<Room>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, map_room_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(RoomRow::into_room).collect()
}

fn map_room_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoomRow> {
    Ok(RoomRow {
        id: row.get(0)?,
        participant_a: row.get(1)?,
        participant_b: row.get(2)?,
        mode: row.get(3)?,
        created_at: row.get(4)?,
    })
}
