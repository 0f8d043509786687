//! Database row types. These map directly to SQLite rows and are converted
//! into the shared domain models before leaving the crate.

use anyhow::{Context, anyhow};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use twofold_types::models::{Message, Mode, Room, User};

use crate::StoreResult;

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub social_name: String,
    pub professional_name: String,
    pub created_at: String,
}

pub struct RoomRow {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub mode: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: String,
}

/// Current time truncated to the stored precision, so a value returned to
/// the caller compares equal to the one read back later.
pub fn now_micros() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now)
}

/// Fixed-width RFC 3339 with microseconds: text order equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // datetime('now') style, no timezone
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("corrupt timestamp '{}'", raw))?;
    Ok(ts)
}

pub fn parse_id(raw: &str, column: &str) -> StoreResult<Uuid> {
    let id = raw
        .parse::<Uuid>()
        .with_context(|| format!("corrupt {} '{}'", column, raw))?;
    Ok(id)
}

/// Canonical dedup key for an unordered participant pair.
pub fn pair_key(a: Uuid, b: Uuid) -> String {
    if a <= b {
        format!("{}:{}", a, b)
    } else {
        format!("{}:{}", b, a)
    }
}

impl UserRow {
    pub fn into_user(self) -> StoreResult<User> {
        Ok(User {
            id: parse_id(&self.id, "user id")?,
            username: self.username,
            social_name: self.social_name,
            professional_name: self.professional_name,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl RoomRow {
    pub fn into_room(self) -> StoreResult<Room> {
        let mode: Mode = self
            .mode
            .parse()
            .map_err(|e| anyhow!("room {}: {}", self.id, e))?;
        Ok(Room {
            id: parse_id(&self.id, "room id")?,
            participants: [
                parse_id(&self.participant_a, "participant_a")?,
                parse_id(&self.participant_b, "participant_b")?,
            ],
            mode,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl MessageRow {
    pub fn into_message(self) -> StoreResult<Message> {
        Ok(Message {
            id: parse_id(&self.id, "message id")?,
            room_id: parse_id(&self.room_id, "room_id")?,
            sender_id: parse_id(&self.sender_id, "sender_id")?,
            text: self.body,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(pair_key(a, b), pair_key(b, a));
        assert_ne!(pair_key(a, b), pair_key(a, a));
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let earlier = now_micros();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(format_timestamp(earlier) < format_timestamp(later));
        assert_eq!(parse_timestamp(&format_timestamp(earlier)).unwrap(), earlier);
    }

    #[test]
    fn parses_sqlite_datetime_format() {
        let ts = parse_timestamp("2024-03-01 10:20:30").unwrap();
        assert_eq!(format_timestamp(ts), "2024-03-01T10:20:30.000000Z");
    }
}
