use axum::{
    Extension, Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use twofold_db::StoreError;
use twofold_types::api::{
    Claims, ConversationSummary, CreateRoomRequest, DeleteRoomResponse, PartnerInfo,
};
use twofold_types::events::GatewayEvent;
use twofold_types::models::{Mode, User};

use crate::auth::{AppState, blocking};
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct ModeQuery {
    pub mode: Option<String>,
}

impl ModeQuery {
    fn parse(&self) -> Result<Mode, ApiError> {
        let raw = self
            .mode
            .as_deref()
            .ok_or_else(|| ApiError::Validation("query parameter 'mode' is required".into()))?;
        raw.parse()
            .map_err(|e: twofold_types::models::InvalidMode| ApiError::Validation(e.to_string()))
    }
}

fn partner_info(user: &User, mode: Mode) -> PartnerInfo {
    PartnerInfo {
        user_id: user.id,
        username: user.username.clone(),
        display_name: user.display_name(mode).to_string(),
    }
}

/// POST /rooms: find-or-create the room between the caller and `participant_id`.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Result<Json<CreateRoomRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let requester = claims.sub;
    let other = req.participant_id;

    if requester == other && !state.gateway.policy.allow_self_chat {
        return Err(ApiError::Validation("cannot open a conversation with yourself".into()));
    }

    let room = blocking(&state, move |db| {
        db.require_user(other)?;
        db.find_or_create_room(requester, other, req.mode)
    })
    .await?;

    Ok(Json(room))
}

/// GET /rooms?mode=: the caller's conversations in one mode, most recent
/// activity first.
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<ModeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let mode = query.parse()?;
    let user_id = claims.sub;

    let mut conversations = blocking(&state, move |db| {
        let rooms = db.list_rooms_for_mode(user_id, mode)?;

        // N+1: one partner lookup and one latest-message query per room.
        let mut out = Vec::with_capacity(rooms.len());
        for room in rooms {
            let Some(partner_id) = room.partner_of(user_id) else {
                continue;
            };
            let partner = db.require_user(partner_id)?;
            let latest_message = db.latest_message(room.id)?;
            out.push((
                room.created_at,
                ConversationSummary {
                    room_id: room.id,
                    mode: room.mode,
                    partner: partner_info(&partner, mode),
                    latest_message,
                },
            ));
        }
        Ok(out)
    })
    .await?;

    conversations.sort_by_key(|(room_created, summary)| {
        std::cmp::Reverse(
            summary
                .latest_message
                .as_ref()
                .map_or(*room_created, |m| m.created_at),
        )
    });

    Ok(Json(
        conversations
            .into_iter()
            .map(|(_, summary)| summary)
            .collect::<Vec<_>>(),
    ))
}

/// GET /rooms/{room_id}/messages: full history, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(room_id) = path?;
    let strict = state.gateway.policy.strict_membership;
    let user_id = claims.sub;

    let messages = blocking(&state, move |db| {
        if strict && !db.require_room(room_id)?.has_participant(user_id) {
            return Err(StoreError::Forbidden);
        }
        db.list_messages(room_id)
    })
    .await?;

    Ok(Json(messages))
}

/// GET /rooms/{room_id}/partner?mode=: the other participant's display info.
pub async fn get_partner(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
    query: Result<Query<ModeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(room_id) = path?;
    let Query(query) = query?;
    let mode = query.parse()?;
    let user_id = claims.sub;

    let partner = blocking(&state, move |db| {
        let room = db.require_room(room_id)?;
        if room.mode != mode {
            return Err(StoreError::NotFound("room in this mode"));
        }
        let partner_id = room
            .partner_of(user_id)
            .ok_or(StoreError::NotFound("partner"))?;
        db.require_user(partner_id)
    })
    .await?;

    Ok(Json(partner_info(&partner, mode)))
}

/// DELETE /rooms/{room_id}: participants only. Cascades to messages and
/// tells live subscribers the room is gone.
pub async fn delete_room(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(room_id) = path?;
    let user_id = claims.sub;
    blocking(&state, move |db| db.delete_room(room_id, user_id)).await?;

    let dispatcher = &state.gateway.dispatcher;
    dispatcher.publish_to_room(room_id, GatewayEvent::RoomDeleted { room_id });
    dispatcher.close_room(room_id);

    info!("{} ({}) deleted room {}", claims.username, user_id, room_id);
    Ok(Json(DeleteRoomResponse { deleted: true }))
}
