use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Message, Mode};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub social_name: Option<String>,
    #[serde(default)]
    pub professional_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Rooms --

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    pub participant_id: Uuid,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerInfo {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
}

/// One entry of the conversation list.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub room_id: Uuid,
    pub mode: Mode,
    pub partner: PartnerInfo,
    pub latest_message: Option<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRoomResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}
