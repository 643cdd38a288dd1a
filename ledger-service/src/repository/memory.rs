use std::sync::Arc;

use async_trait::async_trait;
use common::db::{InMemoryLedgerState, InMemoryTransactionManager};
use common::decimal::Amount;
use common::error::Result;
use common::model::{Account, TransactionRecord};
use common::{DBTransaction, TransactionManager};
use tracing::debug;
use uuid::Uuid;

use super::{AccountStore, LedgerRepository, TransactionLog};

/// In-memory repository for ledger data
pub struct InMemoryLedgerRepository {
    /// Committed ledger and row locks
    state: Arc<InMemoryLedgerState>,
    /// Transaction manager
    transaction_manager: InMemoryTransactionManager,
}

impl InMemoryLedgerRepository {
    /// Create a new in-memory ledger repository
    pub fn new() -> Self {
        let state = Arc::new(InMemoryLedgerState::new());
        Self {
            transaction_manager: InMemoryTransactionManager::new(state.clone()),
            state,
        }
    }
}

impl Default for InMemoryLedgerRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryLedgerRepository {
    async fn create_account(&self, name: &str, opening_balance: Amount) -> Result<Account> {
        let account = Account::open(name, opening_balance)?;
        self.state.insert_account(account.clone()).await?;
        debug!("Created in-memory account {}", account.id);
        Ok(account)
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        Ok(self.state.read().await.accounts.get(&id).cloned())
    }

    async fn read_balance_for_update(&self, account_id: Uuid, tx: &mut DBTransaction) -> Result<Option<Amount>> {
        tx.as_in_memory()?.read_balance_for_update(account_id).await
    }

    async fn write_balance(&self, account_id: Uuid, balance: Amount, tx: &mut DBTransaction) -> Result<()> {
        tx.as_in_memory()?.write_balance(account_id, balance)
    }

    async fn read_balance(&self, account_id: Uuid) -> Result<Option<Amount>> {
        Ok(self.state.read().await.accounts.get(&account_id).map(|a| a.balance))
    }
}

#[async_trait]
impl TransactionLog for InMemoryLedgerRepository {
    async fn find_by_idempotency_key(&self, key: &str, tx: &mut DBTransaction) -> Result<Option<TransactionRecord>> {
        Ok(tx.as_in_memory()?.find_by_idempotency_key(key).await)
    }

    async fn append(&self, record: &TransactionRecord, tx: &mut DBTransaction) -> Result<()> {
        tx.as_in_memory()?.append(record.clone()).await
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<TransactionRecord>> {
        let committed = self.state.read().await;
        let records = committed
            .records
            .get(&account_id)
            .map(|records| records.iter().rev().cloned().collect())
            .unwrap_or_default();
        Ok(records)
    }

    async fn list_page(&self, account_id: Uuid, offset: usize, limit: usize) -> Result<Vec<TransactionRecord>> {
        let committed = self.state.read().await;
        let page = committed
            .records
            .get(&account_id)
            .map(|records| records.iter().rev().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default();
        Ok(page)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    fn transaction_manager(&self) -> &dyn TransactionManager {
        &self.transaction_manager
    }

    async fn close(&self) {
        debug!("Closing in-memory ledger");
        self.state.close();
    }
}
