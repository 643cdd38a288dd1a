use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::account::Account;
use crate::model::transaction::{TransactionKind, TransactionRecord};

/// Database model for the accounts table
#[derive(Debug, Clone, FromRow)]
pub struct DbAccount {
    pub id: Uuid,
    pub name: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
}

impl From<DbAccount> for Account {
    fn from(row: DbAccount) -> Self {
        Account {
            id: row.id,
            name: row.name,
            balance: row.balance,
            created_at: row.created_at,
        }
    }
}

/// Database model for the transactions table
#[derive(Debug, Clone, FromRow)]
pub struct DbTransactionRecord {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: String,
    pub amount: Decimal,
    pub idempotency_key: Option<String>,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<DbTransactionRecord> for TransactionRecord {
    type Error = Error;

    fn try_from(row: DbTransactionRecord) -> Result<Self> {
        let kind = row
            .kind
            .parse::<TransactionKind>()
            .map_err(|e| Error::Internal(format!("corrupt transaction {}: {}", row.id, e)))?;

        Ok(TransactionRecord {
            id: row.id,
            account_id: row.account_id,
            kind,
            amount: row.amount,
            idempotency_key: row.idempotency_key,
            balance_after: row.balance_after,
            created_at: row.created_at,
        })
    }
}
