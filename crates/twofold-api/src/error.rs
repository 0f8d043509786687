use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use twofold_db::StoreError;
use twofold_types::api::ErrorBody;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid credentials")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            error!("Internal error: {:#}", e);
        }
        let body = ErrorBody {
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            StoreError::Forbidden => Self::Forbidden(err.to_string()),
            StoreError::Validation(msg) => Self::Validation(msg),
            StoreError::Conflict(_) => Self::Conflict(err.to_string()),
            StoreError::Internal(e) => Self::Internal(e),
        }
    }
}

// Extractor rejections would otherwise answer in plain text.

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_to_statuses() {
        let cases = [
            (StoreError::NotFound("room"), StatusCode::NOT_FOUND),
            (StoreError::Forbidden, StatusCode::FORBIDDEN),
            (StoreError::Validation("empty".into()), StatusCode::BAD_REQUEST),
            (StoreError::Conflict("username"), StatusCode::CONFLICT),
            (
                StoreError::Internal(anyhow::anyhow!("disk on fire")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (store, status) in cases {
            assert_eq!(ApiError::from(store).status(), status);
        }
    }

    #[test]
    fn internal_details_are_not_exposed() {
        let err = ApiError::from(StoreError::Internal(anyhow::anyhow!("disk on fire")));
        assert_eq!(err.to_string(), "internal server error");
        assert_eq!(ApiError::from(StoreError::NotFound("room")).to_string(), "room not found");
    }
}
