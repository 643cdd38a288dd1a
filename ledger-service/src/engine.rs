//! Ledger transaction engine
//!
//! Applies one credit or debit per unit of work:
//! idempotency check, locked balance read, validation, balance write, log
//! append, commit. Every path either commits the balance write together with
//! the log append or leaves storage untouched.

use std::sync::Arc;

use chrono::Utc;
use common::decimal::{checked_credit, checked_debit};
use common::error::{Error, ErrorExt, Result};
use common::model::{ApplyTransactionRequest, TransactionKind, TransactionOutcome, TransactionRecord};
use common::DBTransaction;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::repository::{AccountStore, LedgerRepository, TransactionLog};

/// What a unit of work decided before commit
enum Decision {
    /// The key was already committed; nothing to write
    Replay(TransactionRecord),
    /// A new record is staged and waiting for commit
    Apply(TransactionRecord),
}

/// Engine that owns the read-modify-write cycle on account balances
#[derive(Clone)]
pub struct LedgerEngine {
    repo: Arc<dyn LedgerRepository>,
    transaction_logging: bool,
}

impl LedgerEngine {
    /// Create an engine over the given storage
    pub fn new(repo: Arc<dyn LedgerRepository>) -> Self {
        Self {
            repo,
            transaction_logging: false,
        }
    }

    /// Log every applied transaction at info level
    pub fn with_transaction_logging(mut self, enabled: bool) -> Self {
        self.transaction_logging = enabled;
        self
    }

    /// Apply a credit or debit to an account.
    ///
    /// The unit of work runs on its own task: if the caller stops waiting, it
    /// still commits or aborts as a whole.
    pub async fn apply_transaction(&self, request: ApplyTransactionRequest) -> Result<TransactionOutcome> {
        let request = request.validate()?;
        let engine = self.clone();

        tokio::spawn(async move { engine.run(request).await })
            .await
            .map_err(|e| Error::Internal(format!("unit of work task failed: {}", e)))?
    }

    async fn run(&self, request: ApplyTransactionRequest) -> Result<TransactionOutcome> {
        let mut tx = self
            .repo
            .begin_transaction()
            .await
            .map_err(|e| storage_unavailable("could not begin unit of work", e))?;

        let decision = match self.decide(&request, &mut tx).await {
            Ok(decision) => decision,
            Err(Error::DuplicateIdempotencyKey(_)) => {
                // Someone committed the same key after our check
                self.rollback(tx, &request).await;
                return self.replay_committed(&request).await;
            }
            Err(e) => {
                warn!(
                    "Aborting {} of {} on account {}: {}",
                    request.kind, request.amount, request.account_id, e
                );
                self.rollback(tx, &request).await;
                return Err(in_unit_failure(e));
            }
        };

        match decision {
            Decision::Replay(record) => {
                self.rollback(tx, &request).await;
                debug!(
                    "Idempotency key {:?} already applied as transaction {}",
                    record.idempotency_key, record.id
                );
                if record.account_id != request.account_id
                    || record.kind != request.kind
                    || record.amount != request.amount
                {
                    warn!(
                        "Replayed transaction {} differs from retried request for account {}",
                        record.id, request.account_id
                    );
                }
                Ok(TransactionOutcome::replayed(&record))
            }
            Decision::Apply(record) => match tx.commit().await {
                Ok(()) => {
                    if self.transaction_logging {
                        info!(
                            transaction_id = %record.id,
                            account_id = %record.account_id,
                            kind = %record.kind,
                            amount = %record.amount,
                            balance = %record.balance_after,
                            "Applied transaction"
                        );
                    } else {
                        debug!("Applied transaction {} to account {}", record.id, record.account_id);
                    }
                    Ok(TransactionOutcome::applied(&record))
                }
                Err(Error::DuplicateIdempotencyKey(_)) => self.replay_committed(&request).await,
                Err(e) => {
                    error!("Failed to commit transaction {}: {}", record.id, e);
                    Err(storage_unavailable("could not commit unit of work", e))
                }
            },
        }
    }

    /// Steps run while the unit of work is open; nothing here commits
    async fn decide(&self, request: &ApplyTransactionRequest, tx: &mut DBTransaction) -> Result<Decision> {
        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(record) = self
                .repo
                .find_by_idempotency_key(key, tx)
                .await
                .with_context(|| "idempotency check failed")?
            {
                return Ok(Decision::Replay(record));
            }
        }

        let balance = self
            .repo
            .read_balance_for_update(request.account_id, tx)
            .await
            .with_context(|| format!("could not lock account {}", request.account_id))?
            .ok_or_else(|| Error::AccountNotFound(request.account_id.to_string()))?;

        let new_balance = match request.kind {
            TransactionKind::Credit => checked_credit(balance, request.amount)?,
            TransactionKind::Debit => {
                if balance < request.amount {
                    return Err(Error::InsufficientFunds(format!(
                        "account {} has {}, cannot debit {}",
                        request.account_id, balance, request.amount
                    )));
                }
                checked_debit(balance, request.amount)?
            }
        };

        self.repo
            .write_balance(request.account_id, new_balance, tx)
            .await
            .with_context(|| format!("could not update balance of account {}", request.account_id))?;

        let record = TransactionRecord {
            id: Uuid::new_v4(),
            account_id: request.account_id,
            kind: request.kind,
            amount: request.amount,
            idempotency_key: request.idempotency_key.clone(),
            balance_after: new_balance,
            created_at: Utc::now(),
        };
        self.repo
            .append(&record, tx)
            .await
            .with_context(|| format!("could not append transaction {}", record.id))?;

        Ok(Decision::Apply(record))
    }

    /// Answer with the record another unit of work committed under the same key
    async fn replay_committed(&self, request: &ApplyTransactionRequest) -> Result<TransactionOutcome> {
        let key = request
            .idempotency_key
            .as_deref()
            .ok_or_else(|| Error::Internal("unique violation without an idempotency key".to_string()))?;

        let mut tx = self
            .repo
            .begin_transaction()
            .await
            .map_err(|e| storage_unavailable("could not begin unit of work", e))?;
        let found = self.repo.find_by_idempotency_key(key, &mut tx).await;
        self.rollback(tx, request).await;

        match found.map_err(in_unit_failure)? {
            Some(record) => {
                debug!("Concurrent retry of key {:?} resolved to transaction {}", key, record.id);
                Ok(TransactionOutcome::replayed(&record))
            }
            None => Err(Error::Internal(format!(
                "idempotency key {:?} conflicted but no committed record was found",
                key
            ))),
        }
    }

    async fn rollback(&self, tx: DBTransaction, request: &ApplyTransactionRequest) {
        if let Err(rollback_err) = tx.rollback().await {
            // Dropping the unit of work discards it anyway
            error!(
                "Failed to roll back unit of work for account {}: {}",
                request.account_id, rollback_err
            );
        }
    }
}

/// Raw database errors inside a rolled-back unit of work are storage failures
fn in_unit_failure(err: Error) -> Error {
    match err {
        Error::Database(e) => Error::storage_unavailable("storage failed inside unit of work", e),
        other => other,
    }
}

fn storage_unavailable(context: &str, err: Error) -> Error {
    match err {
        Error::StorageUnavailable(_) => err,
        other => Error::storage_unavailable(context, other),
    }
}
