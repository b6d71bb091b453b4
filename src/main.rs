// src/main.rs
mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod models;
mod polls;
mod routes;
mod session;

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load();

    let pool = db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to the database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let app = routes::create_routes(pool);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {addr}");
    axum_server::bind(addr)
        .serve(app.into_make_service())
        .await
        .expect("server error");
}
