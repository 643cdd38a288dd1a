//! Transaction log models and request types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{parse_amount, Amount};
use crate::error::{Error, Result};

/// Longest idempotency key accepted
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Direction of a balance change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Adds to the balance
    Credit,
    /// Removes from the balance
    Debit,
}

impl TransactionKind {
    /// Stored and wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Credit => "credit",
            TransactionKind::Debit => "debit",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "credit" => Ok(TransactionKind::Credit),
            "debit" => Ok(TransactionKind::Debit),
            other => Err(Error::InvalidRequest(format!(
                "unknown transaction kind {:?}, expected \"credit\" or \"debit\"",
                other
            ))),
        }
    }
}

/// Immutable entry in the transaction log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Engine-generated transaction ID
    pub id: Uuid,
    /// Owning account
    pub account_id: Uuid,
    /// Credit or debit
    pub kind: TransactionKind,
    /// Strictly positive amount
    pub amount: Amount,
    /// Caller-supplied idempotency key, globally unique when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Account balance as of this commit
    pub balance_after: Amount,
    /// Assigned inside the unit of work that wrote the record
    pub created_at: DateTime<Utc>,
}

/// Unvalidated transaction request, as received from a caller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransactionRequest {
    pub account_id: String,
    pub kind: String,
    pub amount: String,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Validated request to apply a credit or debit
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyTransactionRequest {
    pub account_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub idempotency_key: Option<String>,
}

impl ApplyTransactionRequest {
    /// Build a credit request
    pub fn credit(account_id: Uuid, amount: Amount) -> Self {
        Self {
            account_id,
            kind: TransactionKind::Credit,
            amount,
            idempotency_key: None,
        }
    }

    /// Build a debit request
    pub fn debit(account_id: Uuid, amount: Amount) -> Self {
        Self {
            account_id,
            kind: TransactionKind::Debit,
            amount,
            idempotency_key: None,
        }
    }

    /// Attach an idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Check the request and normalize the idempotency key.
    ///
    /// An empty key counts as no key. Nothing is touched on failure.
    pub fn validate(mut self) -> Result<Self> {
        if self.amount <= Amount::ZERO {
            return Err(Error::InvalidRequest(format!(
                "amount must be strictly positive, got {}",
                self.amount
            )));
        }
        if self.account_id.is_nil() {
            return Err(Error::InvalidRequest("account id must not be nil".to_string()));
        }

        self.idempotency_key = match self.idempotency_key.take() {
            Some(key) if key.trim().is_empty() => None,
            Some(key) if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN => {
                return Err(Error::InvalidRequest(format!(
                    "idempotency key longer than {} characters",
                    MAX_IDEMPOTENCY_KEY_LEN
                )));
            }
            other => other,
        };

        Ok(self)
    }
}

impl TryFrom<RawTransactionRequest> for ApplyTransactionRequest {
    type Error = Error;

    fn try_from(raw: RawTransactionRequest) -> Result<Self> {
        let account_id = Uuid::parse_str(raw.account_id.trim()).map_err(|e| {
            Error::InvalidRequest(format!("malformed account id {:?}: {}", raw.account_id, e))
        })?;
        let kind = raw.kind.parse::<TransactionKind>()?;
        let amount = parse_amount(&raw.amount)?;

        Self {
            account_id,
            kind,
            amount,
            idempotency_key: raw.idempotency_key,
        }
        .validate()
    }
}

/// Result of a successful ApplyTransaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub transaction_id: Uuid,
    pub account_id: Uuid,
    pub balance: Amount,
    /// True when answered from an earlier commit with the same idempotency key
    pub replayed: bool,
}

impl TransactionOutcome {
    /// Outcome of a freshly committed record
    pub fn applied(record: &TransactionRecord) -> Self {
        Self {
            transaction_id: record.id,
            account_id: record.account_id,
            balance: record.balance_after,
            replayed: false,
        }
    }

    /// Outcome replayed from a record committed earlier
    pub fn replayed(record: &TransactionRecord) -> Self {
        Self {
            replayed: true,
            ..Self::applied(record)
        }
    }
}

/// Window into an account's history, most-recent-first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub offset: usize,
    pub limit: usize,
}

impl Default for HistoryPage {
    fn default() -> Self {
        Self { offset: 0, limit: 50 }
    }
}
