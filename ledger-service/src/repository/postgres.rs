use async_trait::async_trait;
use common::db::models::{DbAccount, DbTransactionRecord};
use common::db::transaction::unique_violation_constraint;
use common::db::{init_db_pool, PgTransactionManager};
use common::decimal::Amount;
use common::error::{Error, Result};
use common::model::{Account, TransactionRecord};
use common::{DBTransaction, TransactionManager};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use super::{AccountStore, LedgerRepository, TransactionLog};
use crate::config::LedgerConfig;

const RECORD_COLUMNS: &str =
    "id, account_id, kind, amount, idempotency_key, balance_after, created_at";

/// PostgreSQL repository for ledger data
pub struct PostgresLedgerRepository {
    /// Database connection pool
    pool: PgPool,
    /// Transaction manager
    transaction_manager: PgTransactionManager,
}

impl PostgresLedgerRepository {
    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            transaction_manager: PgTransactionManager::new(pool.clone()),
            pool,
        }
    }

    /// Create a new PostgreSQL ledger repository with configuration
    pub async fn with_config(config: &LedgerConfig) -> Result<Self> {
        info!("Connecting to PostgreSQL database with pool size: {}", config.db_pool_size);

        let pool = init_db_pool(&config.database_url, config.db_pool_size, config.acquire_timeout()).await?;

        info!("Connected to PostgreSQL database");
        Ok(Self::from_pool(pool))
    }

    /// Connection pool, for migrations and tests
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AccountStore for PostgresLedgerRepository {
    async fn create_account(&self, name: &str, opening_balance: Amount) -> Result<Account> {
        let account = Account::open(name, opening_balance)?;
        debug!("Creating account {} in database", account.id);

        let row: DbAccount = sqlx::query_as(
            "INSERT INTO accounts (id, name, balance, created_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, balance, created_at",
        )
        .bind(account.id)
        .bind(&account.name)
        .bind(account.balance)
        .bind(account.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        debug!("Getting account from database: {}", id);

        let row: Option<DbAccount> =
            sqlx::query_as("SELECT id, name, balance, created_at FROM accounts WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Account::from))
    }

    async fn read_balance_for_update(&self, account_id: Uuid, tx: &mut DBTransaction) -> Result<Option<Amount>> {
        let conn = tx.as_postgres()?.connection();

        let balance: Option<Amount> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(conn)
                .await?;

        Ok(balance)
    }

    async fn write_balance(&self, account_id: Uuid, balance: Amount, tx: &mut DBTransaction) -> Result<()> {
        let conn = tx.as_postgres()?.connection();

        let result = sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(account_id)
            .execute(conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::AccountNotFound(account_id.to_string()));
        }
        Ok(())
    }

    async fn read_balance(&self, account_id: Uuid) -> Result<Option<Amount>> {
        let balance: Option<Amount> = sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(balance)
    }
}

#[async_trait]
impl TransactionLog for PostgresLedgerRepository {
    async fn find_by_idempotency_key(&self, key: &str, tx: &mut DBTransaction) -> Result<Option<TransactionRecord>> {
        let conn = tx.as_postgres()?.connection();

        let row: Option<DbTransactionRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE idempotency_key = $1",
            RECORD_COLUMNS
        ))
        .bind(key)
        .fetch_optional(conn)
        .await?;

        row.map(TransactionRecord::try_from).transpose()
    }

    async fn append(&self, record: &TransactionRecord, tx: &mut DBTransaction) -> Result<()> {
        let conn = tx.as_postgres()?.connection();

        let result = sqlx::query(&format!(
            "INSERT INTO transactions ({}) VALUES ($1, $2, $3, $4, $5, $6, $7)",
            RECORD_COLUMNS
        ))
        .bind(record.id)
        .bind(record.account_id)
        .bind(record.kind.as_str())
        .bind(record.amount)
        .bind(record.idempotency_key.as_deref())
        .bind(record.balance_after)
        .bind(record.created_at)
        .execute(conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => match (unique_violation_constraint(&err), record.idempotency_key.as_deref()) {
                (Some(_), Some(key)) => Err(Error::DuplicateIdempotencyKey(key.to_string())),
                _ => Err(Error::Database(err)),
            },
        }
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<TransactionRecord>> {
        let rows: Vec<DbTransactionRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE account_id = $1 ORDER BY created_at DESC, seq DESC",
            RECORD_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRecord::try_from).collect()
    }

    async fn list_page(&self, account_id: Uuid, offset: usize, limit: usize) -> Result<Vec<TransactionRecord>> {
        let offset = i64::try_from(offset)
            .map_err(|_| Error::InvalidRequest(format!("page offset {} is out of range", offset)))?;
        let limit = i64::try_from(limit)
            .map_err(|_| Error::InvalidRequest(format!("page limit {} is out of range", limit)))?;

        let rows: Vec<DbTransactionRecord> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE account_id = $1 ORDER BY created_at DESC, seq DESC LIMIT $2 OFFSET $3",
            RECORD_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRecord::try_from).collect()
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    fn transaction_manager(&self) -> &dyn TransactionManager {
        &self.transaction_manager
    }

    async fn close(&self) {
        info!("Closing PostgreSQL connection pool");
        self.pool.close().await;
    }
}
