//! Database module for SQLite persistence
//!
//! Holds file records and their chunk references behind the
//! [`MetadataStore`] interface.

mod files;
mod schema;
mod store;

pub use files::SqliteMetadataStore;
pub use schema::*;
pub use store::MetadataStore;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use crate::error::Result;

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = if database_url.contains(":memory:") {
        // Every connection to :memory: is a separate database, so keep exactly one alive
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        let options = options
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?
    };

    // Run migrations
    initialize_schema(&pool).await?;

    Ok(pool)
}
