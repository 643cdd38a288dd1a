use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::error::{Error, Result};

pub mod memory;
pub mod models;
pub mod transaction;

// Re-export transaction types
pub use memory::{InMemoryLedgerState, InMemoryTransaction, InMemoryTransactionManager};
pub use transaction::{DBTransaction, PgTransaction, PgTransactionManager, TransactionManager};

/// Embedded schema migrations from the workspace `migrations/` directory
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../migrations");

/// Initialize the database connection pool
pub async fn init_db_pool(database_url: &str, max_connections: u32, acquire_timeout: Duration) -> Result<PgPool> {
    if database_url.is_empty() {
        return Err(Error::ConfigurationError("database url must be set".to_string()));
    }

    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| Error::storage_unavailable("could not connect to database", e))
}

/// Run migrations on the database
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}
