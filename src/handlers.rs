// src/handlers.rs
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::auth;
use crate::error::AppError;
use crate::models::{
    ChangeRoleRequest, CreatePollRequest, LoginRequest, Role, SessionUser, SignupRequest,
    VoteRequest,
};
use crate::polls;
use crate::session;

/// Register a new user and log them in. The first user (or any user created
/// while no admin exists) becomes admin.
pub async fn signup(
    session: Session,
    State(pool): State<PgPool>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::signup(&pool, &req.name, &req.email, &req.password).await?;
    session::establish(&session, &user).await?;

    let message = match user.role {
        Role::Admin => "signup successful, you are now admin",
        Role::User => "signup successful, you can now vote on polls",
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": SessionUser::from(&user), "message": message })),
    ))
}

/// Verify credentials and establish a session.
pub async fn login(
    session: Session,
    State(pool): State<PgPool>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::login(&pool, &req.email, &req.password).await?;
    session::establish(&session, &user).await?;

    let redirect = req.redirect.unwrap_or_else(|| "/".to_string());
    Ok(Json(json!({
        "user": SessionUser::from(&user),
        "redirect": redirect,
    })))
}

/// Destroy the session unconditionally.
pub async fn logout(session: Session) -> Result<impl IntoResponse, AppError> {
    session::clear(&session).await?;
    Ok(Json(json!({ "message": "logged out" })))
}

/// Promote the earliest-created user to admin if no admin exists yet.
pub async fn setup_admin(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let user = auth::bootstrap_admin(&pool).await?;
    Ok(Json(json!({
        "message": format!("user {} is now admin, please login again", user.email),
        "user": SessionUser::from(&user),
    })))
}

/// Admin panel data: user counts, the full user list and the current session.
pub async fn check_admin(
    session: Session,
    State(pool): State<PgPool>,
) -> Result<impl IntoResponse, AppError> {
    let total_users = auth::count_users(&pool, None).await?;
    let admin_count = auth::count_users(&pool, Some(Role::Admin)).await?;
    let users = auth::list_users(&pool).await?;
    let current_user = session::current_user(&session).await?;

    Ok(Json(json!({
        "current_user": current_user,
        "total_users": total_users,
        "admin_count": admin_count,
        "users": users,
    })))
}

/// Change a user's role (admin only). Privilege is re-checked against the
/// database, not the session snapshot.
pub async fn change_role(
    session: Session,
    State(pool): State<PgPool>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let acting = session::require_user(&session).await?;
    let new_role: Role = req
        .new_role
        .parse()
        .map_err(|_| AppError::Validation("role must be admin or user".into()))?;
    let updated = auth::change_role(&pool, acting.id, req.user_id, new_role).await?;

    // Keep the session's cached role in sync when admins touch themselves.
    if updated.id == acting.id {
        session::update_role(&session, updated.role).await?;
    }

    Ok(Json(json!({
        "message": format!("user {} role changed to {}", updated.email, updated.role),
        "user": SessionUser::from(&updated),
    })))
}

/// List all polls, newest first.
pub async fn list_polls(State(pool): State<PgPool>) -> Result<impl IntoResponse, AppError> {
    let polls = polls::list_polls(&pool).await?;
    Ok(Json(json!({ "polls": polls })))
}

/// Create a poll. Requires a logged-in user.
pub async fn create_poll(
    session: Session,
    State(pool): State<PgPool>,
    Json(req): Json<CreatePollRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = session::require_user(&session).await?;
    let poll = polls::create_poll(&pool, user.id, &req.question, &req.options, req.expires_at)
        .await?;
    Ok((StatusCode::CREATED, Json(json!({ "poll": poll }))))
}

/// Fetch one poll. When a session user is present the response says which
/// option they voted for, if any.
pub async fn get_poll(
    session: Session,
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let poll = polls::get_poll(&pool, id).await?;

    let user_voted = match session::current_user(&session).await? {
        Some(user) => polls::find_vote(&pool, poll.id, user.id)
            .await?
            .map(|v| v.option_idx),
        None => None,
    };

    let expired = polls::is_expired(&poll, chrono::Utc::now());
    Ok(Json(json!({
        "poll": poll,
        "user_voted": user_voted,
        "expired": expired,
    })))
}

/// Cast a vote. Requires a logged-in user; one vote per user per poll.
pub async fn cast_vote(
    session: Session,
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
    Json(req): Json<VoteRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = session::require_user(&session).await?;
    polls::cast_vote(&pool, id, user.id, req.option).await?;
    Ok(Json(json!({ "message": "vote recorded" })))
}

/// Aggregated results for one poll.
pub async fn poll_results(
    State(pool): State<PgPool>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let results = polls::get_results(&pool, id).await?;
    Ok(Json(results))
}
