//! In-memory ledger storage with real unit-of-work semantics
//!
//! Committed state sits behind one async `RwLock`, so a commit becomes visible
//! to readers all at once. Each account has its own mutex; a unit of work
//! holds the owned guard from its locked read until it commits or is dropped,
//! which is what serializes concurrent writers on one account. Writes are
//! staged inside the [`InMemoryTransaction`] and only applied on commit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockReadGuard};
use tracing::debug;
use uuid::Uuid;

use super::transaction::{DBTransaction, TransactionManager};
use crate::decimal::Amount;
use crate::error::{Error, Result};
use crate::model::account::Account;
use crate::model::transaction::TransactionRecord;

/// Everything a reader may observe
#[derive(Debug, Default)]
pub struct CommittedLedger {
    /// Accounts by ID
    pub accounts: HashMap<Uuid, Account>,
    /// Records per account, in commit order
    pub records: HashMap<Uuid, Vec<TransactionRecord>>,
    /// Records by idempotency key
    pub idempotency_index: HashMap<String, TransactionRecord>,
}

/// Shared in-memory ledger state
#[derive(Debug, Default)]
pub struct InMemoryLedgerState {
    committed: RwLock<CommittedLedger>,
    row_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    closed: AtomicBool,
}

impl InMemoryLedgerState {
    /// Create empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to committed state
    pub async fn read(&self) -> RwLockReadGuard<'_, CommittedLedger> {
        self.committed.read().await
    }

    /// Insert a freshly opened account
    pub async fn insert_account(&self, account: Account) -> Result<()> {
        let mut committed = self.committed.write().await;
        if committed.accounts.contains_key(&account.id) {
            return Err(Error::Internal(format!("account {} already exists", account.id)));
        }
        committed.accounts.insert(account.id, account);
        Ok(())
    }

    /// Stop accepting units of work. Committed state stays readable.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::StorageUnavailable("in-memory ledger is closed".to_string()));
        }
        Ok(())
    }

    async fn lock_row(&self, account_id: Uuid) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no map shard stays locked across the await
        let row_lock = self.row_locks.entry(account_id).or_default().clone();
        row_lock.lock_owned().await
    }
}

/// Staged, uncommitted writes of one unit of work
pub struct InMemoryTransaction {
    state: Arc<InMemoryLedgerState>,
    row_guards: HashMap<Uuid, OwnedMutexGuard<()>>,
    staged_balances: HashMap<Uuid, Amount>,
    staged_records: Vec<TransactionRecord>,
}

impl InMemoryTransaction {
    /// Create a new in-memory transaction
    pub fn new(state: Arc<InMemoryLedgerState>) -> Self {
        Self {
            state,
            row_guards: HashMap::new(),
            staged_balances: HashMap::new(),
            staged_records: Vec::new(),
        }
    }

    /// Lock an account row for the rest of this unit of work and return its
    /// balance as this unit of work sees it
    pub async fn read_balance_for_update(&mut self, account_id: Uuid) -> Result<Option<Amount>> {
        if !self.state.read().await.accounts.contains_key(&account_id) {
            return Ok(None);
        }

        if !self.row_guards.contains_key(&account_id) {
            debug!("Waiting for row lock on account {}", account_id);
            let guard = self.state.lock_row(account_id).await;
            self.row_guards.insert(account_id, guard);
        }

        if let Some(balance) = self.staged_balances.get(&account_id) {
            return Ok(Some(*balance));
        }
        Ok(self.state.read().await.accounts.get(&account_id).map(|a| a.balance))
    }

    /// Stage a balance write; the row must be locked first
    pub fn write_balance(&mut self, account_id: Uuid, balance: Amount) -> Result<()> {
        if !self.row_guards.contains_key(&account_id) {
            return Err(Error::Internal(format!(
                "balance of account {} written without holding its lock",
                account_id
            )));
        }
        self.staged_balances.insert(account_id, balance);
        Ok(())
    }

    /// Look up a record by idempotency key, staged records included
    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<TransactionRecord> {
        if let Some(record) = self
            .staged_records
            .iter()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
        {
            return Some(record.clone());
        }
        self.state.read().await.idempotency_index.get(key).cloned()
    }

    /// Stage a record append, rejecting an idempotency key that is already taken
    pub async fn append(&mut self, record: TransactionRecord) -> Result<()> {
        if let Some(key) = record.idempotency_key.as_deref() {
            if self.find_by_idempotency_key(key).await.is_some() {
                return Err(Error::DuplicateIdempotencyKey(key.to_string()));
            }
        }
        self.staged_records.push(record);
        Ok(())
    }

    /// Apply all staged writes at once, then release the row locks
    pub async fn commit(self) -> Result<()> {
        let mut committed = self.state.committed.write().await;
        self.state.ensure_open()?;

        // Validate everything before touching anything
        for record in &self.staged_records {
            if let Some(key) = record.idempotency_key.as_deref() {
                if committed.idempotency_index.contains_key(key) {
                    return Err(Error::DuplicateIdempotencyKey(key.to_string()));
                }
            }
        }
        for account_id in self.staged_balances.keys() {
            if !committed.accounts.contains_key(account_id) {
                return Err(Error::AccountNotFound(account_id.to_string()));
            }
        }

        for (account_id, balance) in &self.staged_balances {
            if let Some(account) = committed.accounts.get_mut(account_id) {
                account.balance = *balance;
            }
        }
        for record in self.staged_records {
            if let Some(key) = record.idempotency_key.clone() {
                committed.idempotency_index.insert(key, record.clone());
            }
            committed.records.entry(record.account_id).or_default().push(record);
        }

        // Readers see the new state before the next writer gets the row
        drop(committed);
        drop(self.row_guards);
        Ok(())
    }

    /// Discard all staged writes
    pub async fn rollback(self) -> Result<()> {
        debug!(
            "Rolling back in-memory unit of work with {} staged records",
            self.staged_records.len()
        );
        Ok(())
    }
}

/// In-memory transaction manager
pub struct InMemoryTransactionManager {
    state: Arc<InMemoryLedgerState>,
}

impl InMemoryTransactionManager {
    /// Create a new in-memory transaction manager over shared state
    pub fn new(state: Arc<InMemoryLedgerState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    async fn begin_transaction(&self) -> Result<DBTransaction> {
        self.state.ensure_open()?;
        Ok(DBTransaction::InMemory(InMemoryTransaction::new(self.state.clone())))
    }
}
