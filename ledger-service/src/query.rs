//! Read-only views over committed ledger state

use std::sync::Arc;

use common::decimal::Amount;
use common::error::{Error, Result};
use common::model::{HistoryPage, TransactionRecord};
use tracing::debug;
use uuid::Uuid;

use crate::repository::{AccountStore, LedgerRepository, TransactionLog};

/// Balance and history lookups; never takes part in locking
#[derive(Clone)]
pub struct QueryService {
    repo: Arc<dyn LedgerRepository>,
}

impl QueryService {
    /// Create a query service over the given storage
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self { repo }
    }

    /// Current committed balance of an account
    pub async fn get_balance(&self, account_id: Uuid) -> Result<Amount> {
        self.repo
            .read_balance(account_id)
            .await?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))
    }

    /// Full history of an account, most-recent-first
    pub async fn get_history(&self, account_id: Uuid) -> Result<Vec<TransactionRecord>> {
        self.ensure_account(account_id).await?;
        self.repo.list_by_account(account_id).await
    }

    /// One page of an account's history, most-recent-first
    pub async fn get_history_page(&self, account_id: Uuid, page: HistoryPage) -> Result<Vec<TransactionRecord>> {
        if page.limit == 0 {
            return Err(Error::InvalidRequest("page limit must be at least 1".to_string()));
        }
        debug!(
            "Reading history of account {} (offset {}, limit {})",
            account_id, page.offset, page.limit
        );

        self.ensure_account(account_id).await?;
        self.repo.list_page(account_id, page.offset, page.limit).await
    }

    async fn ensure_account(&self, account_id: Uuid) -> Result<()> {
        match self.repo.get_account(account_id).await? {
            Some(_) => Ok(()),
            None => Err(Error::AccountNotFound(account_id.to_string())),
        }
    }
}
