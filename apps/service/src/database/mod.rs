/// Persistence layer
///
/// Versioned schema, row models, and the `Database` trait the rest of the
/// engine programs against. Backed by a local LibSQL (SQLite) file.
pub mod migrations;
pub mod models;
pub mod repository;

pub use repository::{Database, DatabaseImpl};

use anyhow::Result;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}
