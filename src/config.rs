// src/config.rs
use std::env;

pub struct Config {
    pub port: u16,
    pub database_url: String,
}

impl Config {
    /// Reads configuration from the environment. `dotenvy` has already been
    /// given a chance to populate it from a .env file.
    pub fn load() -> Self {
        let port = env::var("PORT").unwrap_or_else(|_| "3030".to_string());
        let port = port.parse::<u16>().expect("PORT must be a valid number");

        let database_url = env::var("DATABASE_URL").expect("DATABASE_URL must be set");

        Self { port, database_url }
    }
}
