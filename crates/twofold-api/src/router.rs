use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::realtime;
use crate::rooms;

pub fn build(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/rooms", post(rooms::create_room).get(rooms::list_conversations))
        .route("/rooms/{room_id}", delete(rooms::delete_room))
        .route("/rooms/{room_id}/messages", get(rooms::get_messages))
        .route("/rooms/{room_id}/partner", get(rooms::get_partner))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let ws_route = Router::new()
        .route("/gateway", get(realtime::ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
