use std::env;

use diesel::{connection::SimpleConnection, prelude::*, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenvy::dotenv;

pub mod error;
pub mod handlers;
pub mod models;
pub mod schema;
pub mod serializer;
pub mod store;
pub mod validation;

use store::StoreError;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

pub const DEFAULT_DATABASE_URL: &str = "app.db";

/// Reads `DATABASE_URL` (after loading `.env`), falling back to a local `app.db`.
pub fn database_url() -> String {
    dotenv().ok();

    env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string())
}

/// How long a connection waits on another writer's lock before failing.
pub const BUSY_TIMEOUT_MS: u32 = 5000;

/// Opens a SQLite connection ready for concurrent request handling.
///
/// SQLite keeps `foreign_keys` off and fails immediately on a locked database
/// unless told otherwise, so every connection handed out here enables foreign
/// keys, waits up to [`BUSY_TIMEOUT_MS`] for locks and uses WAL journaling.
pub fn establish_connection(database_url: &str) -> Result<SqliteConnection, StoreError> {
    let mut conn = SqliteConnection::establish(database_url)?;
    conn.batch_execute(&format!(
        "PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}; \
         PRAGMA journal_mode = WAL; \
         PRAGMA foreign_keys = ON;"
    ))?;
    Ok(conn)
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<usize, StoreError> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(StoreError::Migration)?;
    Ok(applied.len())
}
