//! `PostgreSQL` relay tables for Relaykit.
//!
//! Implements [`OutboxStore`](relaykit_core::store::OutboxStore) on `message_broker`
//! and [`InboxStore`](relaykit_core::store::InboxStore) on `received_message_broker`.
//! Queries are plain `sqlx` runtime queries; row-level locking is left to the
//! database.
//!
//! # Example
//!
//! ```no_run
//! use relaykit_core::config::DatabaseConfig;
//! use relaykit_postgres::{PostgresInbox, PostgresOutbox, connect, run_migrations};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DatabaseConfig {
//!     url: Some("postgres://localhost/relay".to_string()),
//!     ..DatabaseConfig::default()
//! };
//! let pool = connect(&config).await?;
//! run_migrations(&pool).await?;
//!
//! let outbox = PostgresOutbox::new(pool.clone());
//! let inbox = PostgresInbox::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod inbox;
mod outbox;

pub use inbox::PostgresInbox;
pub use outbox::PostgresOutbox;

use relaykit_core::config::DatabaseConfig;
use relaykit_core::store::StoreError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Schema for both relay tables. Idempotent.
pub const MIGRATIONS: &str = include_str!("../migrations/0001_relay_tables.sql");

/// Open a connection pool as configured.
///
/// # Errors
///
/// Returns [`StoreError::DatabaseError`] if no URL is configured or the database is
/// unreachable.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, StoreError> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| StoreError::DatabaseError("No database URL configured".to_string()))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout())
        .connect(url)
        .await
        .map_err(database_error)?;

    tracing::info!(max_connections = config.max_connections, "Connected to PostgreSQL");
    Ok(pool)
}

/// Create the relay tables and indexes if they do not exist.
///
/// # Errors
///
/// Returns [`StoreError::DatabaseError`] if a statement fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::raw_sql(MIGRATIONS)
        .execute(pool)
        .await
        .map_err(database_error)?;
    tracing::debug!("Relay tables migrated");
    Ok(())
}

#[allow(clippy::needless_pass_by_value)]
fn database_error(err: sqlx::Error) -> StoreError {
    StoreError::DatabaseError(err.to_string())
}

fn limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
