// src/routes.rs
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tower_sessions::{cookie::time::Duration, Expiry, MemoryStore, SessionManagerLayer};

use crate::handlers;

pub fn create_routes(pool: PgPool) -> Router {
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(Duration::days(1)));

    Router::new()
        .route("/", get(handlers::list_polls))
        .route("/auth/signup", post(handlers::signup))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/setup-admin", get(handlers::setup_admin))
        .route("/auth/check-admin", get(handlers::check_admin))
        .route("/auth/change-role", post(handlers::change_role))
        .route("/polls/create", post(handlers::create_poll))
        .route("/polls/{id}", get(handlers::get_poll))
        .route("/polls/{id}/vote", post(handlers::cast_vote))
        .route("/polls/{id}/results", get(handlers::poll_results))
        .layer(session_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(pool)
}
