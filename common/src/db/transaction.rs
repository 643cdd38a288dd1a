//! Units of work against ledger storage
//!
//! A unit of work is the scope inside which the engine reads with a lock,
//! validates, writes and appends. It is either committed whole or discarded
//! whole. This module defines the trait that opens units of work and the
//! PostgreSQL implementation; the in-memory one lives in [`super::memory`].

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, Transaction as SqlxTransaction};

use super::memory::InMemoryTransaction;
use crate::error::{Error, Result};

/// Transaction enum that can be either PostgreSQL or in-memory
pub enum DBTransaction {
    /// PostgreSQL transaction
    Postgres(PgTransaction),
    /// In-memory transaction
    InMemory(InMemoryTransaction),
}

/// Transaction interface methods
impl DBTransaction {
    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        match self {
            DBTransaction::Postgres(tx) => tx.commit().await,
            DBTransaction::InMemory(tx) => tx.commit().await,
        }
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        match self {
            DBTransaction::Postgres(tx) => tx.rollback().await,
            DBTransaction::InMemory(tx) => tx.rollback().await,
        }
    }

    /// Borrow the PostgreSQL transaction, failing for other backends
    pub fn as_postgres(&mut self) -> Result<&mut PgTransaction> {
        match self {
            DBTransaction::Postgres(tx) => Ok(tx),
            DBTransaction::InMemory(_) => Err(Error::Internal(
                "in-memory unit of work passed to PostgreSQL storage".to_string(),
            )),
        }
    }

    /// Borrow the in-memory transaction, failing for other backends
    pub fn as_in_memory(&mut self) -> Result<&mut InMemoryTransaction> {
        match self {
            DBTransaction::InMemory(tx) => Ok(tx),
            DBTransaction::Postgres(_) => Err(Error::Internal(
                "PostgreSQL unit of work passed to in-memory storage".to_string(),
            )),
        }
    }
}

/// A PostgreSQL transaction implementation
pub struct PgTransaction {
    tx: SqlxTransaction<'static, Postgres>,
}

impl PgTransaction {
    /// Create a new PgTransaction
    pub fn new(tx: SqlxTransaction<'static, Postgres>) -> Self {
        Self { tx }
    }

    /// Connection to run queries on inside this transaction
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Commit the transaction
    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(commit_error)
    }

    /// Rollback the transaction
    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(Error::Database)
    }
}

/// Map a commit failure, keeping unique violations on the idempotency key
/// distinguishable from storage outages
fn commit_error(err: sqlx::Error) -> Error {
    match unique_violation_constraint(&err) {
        Some(constraint) => Error::DuplicateIdempotencyKey(constraint),
        None => Error::storage_unavailable("commit failed", err),
    }
}

/// Name of the violated constraint when `err` is a unique violation
pub fn unique_violation_constraint(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            Some(db_err.constraint().unwrap_or("unique").to_string())
        }
        _ => None,
    }
}

/// Transaction manager trait for creating and managing transactions
#[async_trait]
pub trait TransactionManager: Send + Sync {
    /// Begin a new transaction
    async fn begin_transaction(&self) -> Result<DBTransaction>;
}

/// A PostgreSQL transaction manager implementation
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    /// Create a new PgTransactionManager
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    async fn begin_transaction(&self) -> Result<DBTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_unavailable("could not begin unit of work", e))?;
        Ok(DBTransaction::Postgres(PgTransaction::new(tx)))
    }
}
