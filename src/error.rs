// src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Everything a request can fail with. All variants are recovered at the
/// request boundary: mapped to a status code and a JSON error body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    NotFound(String),

    #[error("poll expired")]
    Expired,

    #[error("already voted")]
    DuplicateVote,

    #[error("{0}")]
    InvariantViolation(String),

    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("password hashing failed")]
    PasswordHash,

    #[error("session error")]
    Session(#[from] tower_sessions::session::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Expired => StatusCode::GONE,
            AppError::DuplicateVote => StatusCode::CONFLICT,
            AppError::InvariantViolation(_) => StatusCode::CONFLICT,
            AppError::Database(_) | AppError::PasswordHash | AppError::Session(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = ?self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// True when the storage layer rejected a write on a unique index. Used to
/// turn a lost insert race into the matching domain error.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.kind() == sqlx::error::ErrorKind::UniqueViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_match_taxonomy() {
        assert_eq!(
            AppError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Conflict("dup".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(AppError::Auth("no".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::NotFound("gone".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(AppError::Expired.status(), StatusCode::GONE);
        assert_eq!(AppError::DuplicateVote.status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::InvariantViolation("last admin".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::PasswordHash.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn duplicate_vote_message_is_stable() {
        assert_eq!(AppError::DuplicateVote.to_string(), "already voted");
    }
}
