use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, info};
use uuid::Uuid;

use twofold_db::users::NewUser;
use twofold_db::{Database, StoreResult};
use twofold_gateway::Gateway;
use twofold_types::api::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};

use crate::error::ApiError;
use crate::identity;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub gateway: Gateway,
    pub jwt_secret: String,
    pub token_ttl: chrono::Duration,
}

impl AppStateInner {
    pub fn db(&self) -> &Database {
        &self.gateway.db
    }
}

/// Run a store call off the async runtime.
pub async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.gateway.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::from)
}

fn display_name_or(name: Option<String>, fallback: &str) -> String {
    name.map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;

    // Validate input
    if req.username.len() < 3 || req.username.len() > 32 {
        return Err(ApiError::Validation("username must be 3 to 32 characters".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }

    let username = req.username.clone();
    if blocking(&state, move |db| db.get_user_credentials(&username))
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("username is taken".into()));
    }

    let password_hash = identity::hash_password(&req.password).map_err(ApiError::Internal)?;
    let user_id = Uuid::new_v4();
    let social_name = display_name_or(req.social_name, &req.username);
    let professional_name = display_name_or(req.professional_name, &req.username);

    let username = req.username.clone();
    blocking(&state, move |db| {
        db.create_user(&NewUser {
            id: user_id,
            username: &username,
            password_hash: &password_hash,
            social_name: &social_name,
            professional_name: &professional_name,
        })
    })
    .await?;

    let token =
        identity::issue_token(&state.jwt_secret, user_id, &req.username, state.token_ttl)
            .map_err(ApiError::Internal)?;

    info!("Registered {} ({})", req.username, user_id);
    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body?;
    let username = req.username.clone();
    let (user, password_hash) = blocking(&state, move |db| db.get_user_credentials(&username))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    if !identity::verify_password(&req.password, &password_hash) {
        return Err(ApiError::Unauthorized);
    }

    let token =
        identity::issue_token(&state.jwt_secret, user.id, &user.username, state.token_ttl)
            .map_err(ApiError::Internal)?;

    Ok(Json(LoginResponse {
        user_id: user.id,
        username: user.username,
        token,
    }))
}
