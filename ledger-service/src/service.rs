//! Ledger service implementation

use std::sync::Arc;

use common::decimal::Amount;
use common::error::{ErrorExt, Result};
use common::model::{Account, ApplyTransactionRequest, HistoryPage, TransactionOutcome, TransactionRecord};
use tracing::info;
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::engine::LedgerEngine;
use crate::query::QueryService;
use crate::repository::{AccountStore, InMemoryLedgerRepository, LedgerRepository, PostgresLedgerRepository};

/// Ledger service: account opening, transactions and queries over one storage backend
pub struct LedgerService {
    /// Repository for ledger data
    repo: Arc<dyn LedgerRepository>,
    /// Transaction engine
    engine: LedgerEngine,
    /// Read-only queries
    query: QueryService,
}

/// Repository Type
pub enum RepositoryType {
    /// In-memory repository
    InMemory,
    /// PostgreSQL repository; falls back to `DATABASE_URL` when no URL is given
    Postgres(Option<String>),
}

impl LedgerService {
    /// Create a new ledger service backed by memory
    pub fn new() -> Self {
        Self::from_repository(Arc::new(InMemoryLedgerRepository::new()), false)
    }

    /// Build a service around an already opened repository
    pub fn from_repository(repo: Arc<dyn LedgerRepository>, transaction_logging: bool) -> Self {
        Self {
            engine: LedgerEngine::new(repo.clone()).with_transaction_logging(transaction_logging),
            query: QueryService::new(repo.clone()),
            repo,
        }
    }

    /// Create a new ledger service with a specific repository type
    pub async fn with_repository(repo_type: RepositoryType) -> Result<Self> {
        match repo_type {
            RepositoryType::InMemory => Ok(Self::new()),
            RepositoryType::Postgres(database_url) => {
                let mut config = LedgerConfig::from_env();
                if let Some(url) = database_url {
                    config.database_url = url;
                }
                Self::with_config(&config).await
            }
        }
    }

    /// Create a new ledger service with a configuration
    pub async fn with_config(config: &LedgerConfig) -> Result<Self> {
        let repo: Arc<dyn LedgerRepository> = Arc::new(PostgresLedgerRepository::with_config(config).await?);
        Ok(Self::from_repository(repo, config.transaction_logging))
    }

    /// Open a new account
    pub async fn create_account(&self, name: &str, opening_balance: Amount) -> Result<Account> {
        info!("Creating account for {:?} with opening balance {}", name, opening_balance);
        self.repo
            .create_account(name, opening_balance)
            .await
            .with_context(|| format!("Failed to create account for {:?}", name))
    }

    /// Get an account by ID
    pub async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        self.repo.get_account(id).await
    }

    /// Apply a credit or debit
    pub async fn apply_transaction(&self, request: ApplyTransactionRequest) -> Result<TransactionOutcome> {
        self.engine.apply_transaction(request).await
    }

    /// Current balance of an account
    pub async fn get_balance(&self, account_id: Uuid) -> Result<Amount> {
        self.query.get_balance(account_id).await
    }

    /// Transaction history of an account, most-recent-first
    pub async fn get_history(&self, account_id: Uuid) -> Result<Vec<TransactionRecord>> {
        self.query.get_history(account_id).await
    }

    /// One page of an account's history
    pub async fn get_history_page(&self, account_id: Uuid, page: HistoryPage) -> Result<Vec<TransactionRecord>> {
        self.query.get_history_page(account_id, page).await
    }

    /// Transaction engine, for callers that only apply transactions
    pub fn engine(&self) -> &LedgerEngine {
        &self.engine
    }

    /// Close the underlying storage
    pub async fn shutdown(&self) {
        info!("Shutting down ledger service");
        self.repo.close().await;
    }
}

impl Default for LedgerService {
    fn default() -> Self {
        Self::new()
    }
}
