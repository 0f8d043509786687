use rusqlite::Connection;
use tracing::info;

use crate::StoreResult;

pub fn run(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, rooms, messages)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                username            TEXT NOT NULL UNIQUE,
                password            TEXT NOT NULL,
                social_name         TEXT NOT NULL,
                professional_name   TEXT NOT NULL,
                created_at          TEXT NOT NULL
            );

            -- pair_key is the two participant ids sorted and joined,
            -- so (a, b) and (b, a) collide on the unique constraint.
            CREATE TABLE rooms (
                id              TEXT PRIMARY KEY,
                participant_a   TEXT NOT NULL REFERENCES users(id),
                participant_b   TEXT NOT NULL REFERENCES users(id),
                pair_key        TEXT NOT NULL,
                mode            TEXT NOT NULL CHECK (mode IN ('social', 'professional')),
                created_at      TEXT NOT NULL,
                UNIQUE(pair_key, mode)
            );

            CREATE INDEX idx_rooms_participant_a ON rooms(participant_a);
            CREATE INDEX idx_rooms_participant_b ON rooms(participant_b);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                room_id     TEXT NOT NULL REFERENCES rooms(id),
                sender_id   TEXT NOT NULL REFERENCES users(id),
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_room ON messages(room_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
