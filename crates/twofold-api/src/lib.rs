pub mod auth;
pub mod error;
pub mod identity;
pub mod middleware;
pub mod realtime;
pub mod rooms;
pub mod router;

pub use auth::{AppState, AppStateInner};
pub use error::ApiError;
