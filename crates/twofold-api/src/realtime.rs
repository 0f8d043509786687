use axum::{
    extract::{
        Query, State, WebSocketUpgrade, rejection::QueryRejection,
        ws::rejection::WebSocketUpgradeRejection,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;

use twofold_gateway::connection;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::identity::verify_token;
use crate::middleware::bearer_token;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// GET /gateway: authenticate the handshake, then upgrade.
///
/// Browsers cannot set headers on a WebSocket request, so the token may come
/// from `?token=` as well as from `Authorization: Bearer`. A bad credential
/// refuses the upgrade with 401; a good one is accepted without any ack.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    query: Result<Query<GatewayQuery>, QueryRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let token = query
        .token
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| {
            warn!("Gateway handshake without credential");
            ApiError::Unauthorized
        })?;

    let claims = verify_token(&state.jwt_secret, &token).inspect_err(|_| {
        warn!("Gateway handshake with invalid credential");
    })?;

    let ws = ws.map_err(|e| ApiError::Validation(e.body_text()))?;
    let gateway = state.gateway.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, gateway, claims.sub, claims.username)
    }))
}
