// src/session.rs
use tower_sessions::Session;

use crate::error::AppError;
use crate::models::{Role, SessionUser, User};

const USER_KEY: &str = "user";

pub async fn current_user(session: &Session) -> Result<Option<SessionUser>, AppError> {
    Ok(session.get::<SessionUser>(USER_KEY).await?)
}

pub async fn require_user(session: &Session) -> Result<SessionUser, AppError> {
    current_user(session)
        .await?
        .ok_or_else(|| AppError::Auth("login required".into()))
}

pub async fn establish(session: &Session, user: &User) -> Result<(), AppError> {
    session.insert(USER_KEY, SessionUser::from(user)).await?;
    Ok(())
}

/// Refreshes the cached role snapshot after the logged-in user changes their
/// own role.
pub async fn update_role(session: &Session, role: Role) -> Result<(), AppError> {
    if let Some(mut user) = session.get::<SessionUser>(USER_KEY).await? {
        user.role = role;
        session.insert(USER_KEY, user).await?;
    }
    Ok(())
}

pub async fn clear(session: &Session) -> Result<(), AppError> {
    session.flush().await?;
    Ok(())
}
