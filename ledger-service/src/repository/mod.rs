//! Storage interfaces consumed by the ledger engine
//!
//! The Account Store and the Transaction Log are separate traits; every method
//! that takes a [`DBTransaction`] runs inside the caller's unit of work, the
//! others read committed state only.

mod memory;
mod postgres;

use async_trait::async_trait;
use common::decimal::Amount;
use common::error::Result;
use common::model::{Account, TransactionRecord};
use common::{DBTransaction, TransactionManager};
use uuid::Uuid;

pub use memory::InMemoryLedgerRepository;
pub use postgres::PostgresLedgerRepository;

/// Durable mapping of account ID to current balance
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Open an account with the given opening balance
    async fn create_account(&self, name: &str, opening_balance: Amount) -> Result<Account>;

    /// Get an account by ID
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>>;

    /// Read a balance and hold the account's exclusive lock until `tx` ends.
    /// Blocks while another unit of work holds the same account.
    async fn read_balance_for_update(&self, account_id: Uuid, tx: &mut DBTransaction) -> Result<Option<Amount>>;

    /// Write a balance inside `tx`; the account must have been read for update
    async fn write_balance(&self, account_id: Uuid, balance: Amount, tx: &mut DBTransaction) -> Result<()>;

    /// Committed balance, without locking
    async fn read_balance(&self, account_id: Uuid) -> Result<Option<Amount>>;
}

/// Append-only log of applied transactions
#[async_trait]
pub trait TransactionLog: Send + Sync {
    /// Find the record carrying `key`, as visible inside `tx`
    async fn find_by_idempotency_key(&self, key: &str, tx: &mut DBTransaction) -> Result<Option<TransactionRecord>>;

    /// Append a record inside `tx`.
    /// Fails with `DuplicateIdempotencyKey` when the key is already taken.
    async fn append(&self, record: &TransactionRecord, tx: &mut DBTransaction) -> Result<()>;

    /// Committed records of an account, most-recent-first
    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<TransactionRecord>>;

    /// At most `limit` committed records of an account after skipping the
    /// `offset` most recent ones
    async fn list_page(&self, account_id: Uuid, offset: usize, limit: usize) -> Result<Vec<TransactionRecord>>;
}

/// A storage backend providing both stores and their units of work
#[async_trait]
pub trait LedgerRepository: AccountStore + TransactionLog {
    /// Get the transaction manager
    fn transaction_manager(&self) -> &dyn TransactionManager;

    /// Begin a unit of work
    async fn begin_transaction(&self) -> Result<DBTransaction> {
        self.transaction_manager().begin_transaction().await
    }

    /// Release storage resources at shutdown
    async fn close(&self) {}
}
