use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persona context a conversation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Social,
    Professional,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Social => "social",
            Self::Professional => "professional",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidMode(pub String);

impl fmt::Display for InvalidMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid mode '{}', expected 'social' or 'professional'", self.0)
    }
}

impl std::error::Error for InvalidMode {}

impl FromStr for Mode {
    type Err = InvalidMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "social" => Ok(Self::Social),
            "professional" => Ok(Self::Professional),
            other => Err(InvalidMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub social_name: String,
    pub professional_name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self, mode: Mode) -> &str {
        match mode {
            Mode::Social => &self.social_name,
            Mode::Professional => &self.professional_name,
        }
    }
}

/// A two-party conversation scoped to one mode.
/// `participants` keeps creation order: requester first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    #[serde(rename = "room_id")]
    pub id: Uuid,
    pub participants: [Uuid; 2],
    pub mode: Mode,
    pub created_at: DateTime<Utc>,
}

impl Room {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.participants.contains(&user_id)
    }

    /// The other participant from `user_id`'s point of view.
    /// For a self-chat room both slots hold the same id, so that id is returned.
    pub fn partner_of(&self, user_id: Uuid) -> Option<Uuid> {
        match self.participants {
            [a, b] if a == user_id => Some(b),
            [a, b] if b == user_id => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub text: String,
    pub created_at: DateTime<Utc>,
}
