use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::decimal::{dec, Amount};
use common::error::{Error, ErrorKind, Result};
use common::model::{Account, ApplyTransactionRequest, TransactionKind, TransactionRecord};
use common::{DBTransaction, TransactionManager};
use futures::future::join_all;
use ledger_service::{
    AccountStore, InMemoryLedgerRepository, LedgerEngine, LedgerRepository, QueryService, TransactionLog,
};
use uuid::Uuid;

struct Fixture {
    repo: Arc<InMemoryLedgerRepository>,
    engine: LedgerEngine,
    query: QueryService,
}

fn fixture() -> Fixture {
    let repo = Arc::new(InMemoryLedgerRepository::new());
    Fixture {
        engine: LedgerEngine::new(repo.clone()),
        query: QueryService::new(repo.clone()),
        repo,
    }
}

async fn open(f: &Fixture, balance: Amount) -> Uuid {
    f.repo.create_account("Test customer", balance).await.unwrap().id
}

#[tokio::test]
async fn test_reference_scenario() {
    let f = fixture();
    let account = open(&f, dec!(100.00)).await;

    let credit = f.engine.apply_transaction(ApplyTransactionRequest::credit(account, dec!(50.00))).await.unwrap();
    assert_eq!(credit.balance, dec!(150.00));
    assert!(!credit.replayed);

    let overdraft = f.engine.apply_transaction(ApplyTransactionRequest::debit(account, dec!(200.00))).await;
    assert!(matches!(overdraft, Err(Error::InsufficientFunds(_))));
    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(150.00));

    let debit = ApplyTransactionRequest::debit(account, dec!(150.00)).with_idempotency_key("k1");
    let first = f.engine.apply_transaction(debit.clone()).await.unwrap();
    assert_eq!(first.balance, dec!(0.00));

    let retry = f.engine.apply_transaction(debit).await.unwrap();
    assert_eq!(retry.balance, dec!(0.00));
    assert_eq!(retry.transaction_id, first.transaction_id);
    assert!(retry.replayed);
    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(0.00));

    let history = f.query.get_history(account).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].kind, TransactionKind::Debit);
    assert_eq!(history[0].amount, dec!(150.00));
    assert_eq!(history[0].idempotency_key.as_deref(), Some("k1"));
    assert_eq!(history[0].id, first.transaction_id);
    assert_eq!(history[1].kind, TransactionKind::Credit);
    assert_eq!(history[1].amount, dec!(50.00));
    assert_eq!(history[1].id, credit.transaction_id);
}

#[tokio::test]
async fn test_insufficient_funds_leaves_no_trace() {
    let f = fixture();
    let account = open(&f, dec!(10.00)).await;

    let result = f
        .engine
        .apply_transaction(ApplyTransactionRequest::debit(account, dec!(10.01)).with_idempotency_key("too-much"))
        .await;
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientFunds);
    assert!(!err.is_retryable());

    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(10.00));
    assert!(f.query.get_history(account).await.unwrap().is_empty());

    // The rejected key was never recorded, so it can still be used
    let exact = f
        .engine
        .apply_transaction(ApplyTransactionRequest::debit(account, dec!(10.00)).with_idempotency_key("too-much"))
        .await
        .unwrap();
    assert_eq!(exact.balance, dec!(0.00));
    assert!(!exact.replayed);
}

#[tokio::test]
async fn test_unknown_account() {
    let f = fixture();
    let missing = Uuid::new_v4();

    let result = f.engine.apply_transaction(ApplyTransactionRequest::credit(missing, dec!(1))).await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::AccountNotFound);
    assert!(matches!(f.query.get_balance(missing).await, Err(Error::AccountNotFound(_))));
}

#[tokio::test]
async fn test_invalid_requests_have_no_side_effects() {
    let f = fixture();
    let account = open(&f, dec!(5)).await;

    for amount in [dec!(0), dec!(-1)] {
        let result = f
            .engine
            .apply_transaction(ApplyTransactionRequest::credit(account, amount).with_idempotency_key("bad"))
            .await;
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidRequest);
    }

    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(5));
    assert!(f.query.get_history(account).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_retry_with_different_payload_is_not_reapplied() {
    let f = fixture();
    let account = open(&f, dec!(100)).await;

    let first = f
        .engine
        .apply_transaction(ApplyTransactionRequest::credit(account, dec!(25)).with_idempotency_key("op-1"))
        .await
        .unwrap();
    let retry = f
        .engine
        .apply_transaction(ApplyTransactionRequest::debit(account, dec!(99)).with_idempotency_key("op-1"))
        .await
        .unwrap();

    assert_eq!(retry.transaction_id, first.transaction_id);
    assert_eq!(retry.balance, dec!(125));
    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(125));
    assert_eq!(f.query.get_history(account).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_idempotency_keys_are_global() {
    let f = fixture();
    let a = open(&f, dec!(10)).await;
    let b = open(&f, dec!(10)).await;

    let first = f
        .engine
        .apply_transaction(ApplyTransactionRequest::credit(a, dec!(5)).with_idempotency_key("shared"))
        .await
        .unwrap();
    let other_account = f
        .engine
        .apply_transaction(ApplyTransactionRequest::credit(b, dec!(5)).with_idempotency_key("shared"))
        .await
        .unwrap();

    assert!(other_account.replayed);
    assert_eq!(other_account.transaction_id, first.transaction_id);
    assert_eq!(other_account.account_id, a);
    assert_eq!(f.query.get_balance(b).await.unwrap(), dec!(10));
}

#[tokio::test]
async fn test_replay_returns_balance_as_of_original_commit() {
    let f = fixture();
    let account = open(&f, dec!(0)).await;

    let keyed = ApplyTransactionRequest::credit(account, dec!(10)).with_idempotency_key("deposit-1");
    f.engine.apply_transaction(keyed.clone()).await.unwrap();
    f.engine.apply_transaction(ApplyTransactionRequest::credit(account, dec!(5))).await.unwrap();

    let replay = f.engine.apply_transaction(keyed).await.unwrap();
    assert_eq!(replay.balance, dec!(10));
    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(15));
}

#[tokio::test]
async fn test_concurrent_transactions_on_one_account_serialize() {
    let f = fixture();
    let account = open(&f, dec!(1000.00)).await;

    let requests: Vec<ApplyTransactionRequest> = (0..100)
        .map(|i| {
            if i % 2 == 0 {
                ApplyTransactionRequest::credit(account, dec!(0.10))
            } else {
                ApplyTransactionRequest::debit(account, dec!(0.30))
            }
        })
        .collect();

    let outcomes = join_all(requests.into_iter().map(|r| f.engine.apply_transaction(r))).await;
    assert!(outcomes.iter().all(|o| o.is_ok()));

    // 50 credits of 0.10 and 50 debits of 0.30
    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(990.00));

    let history = f.query.get_history(account).await.unwrap();
    assert_eq!(history.len(), 100);

    // Replaying history oldest-first reproduces every recorded balance
    let mut running = dec!(1000.00);
    for record in history.iter().rev() {
        running = match record.kind {
            TransactionKind::Credit => running + record.amount,
            TransactionKind::Debit => running - record.amount,
        };
        assert_eq!(record.balance_after, running);
    }
}

#[tokio::test]
async fn test_concurrent_debits_never_overdraw() {
    let f = fixture();
    let account = open(&f, dec!(100)).await;

    let outcomes = join_all(
        (0..30).map(|_| f.engine.apply_transaction(ApplyTransactionRequest::debit(account, dec!(7)))),
    )
    .await;

    let accepted = outcomes.iter().filter(|o| o.is_ok()).count();
    let rejected = outcomes
        .iter()
        .filter(|o| matches!(o, Err(Error::InsufficientFunds(_))))
        .count();

    assert_eq!(accepted, 14);
    assert_eq!(rejected, 16);
    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(2));
}

#[tokio::test]
async fn test_concurrent_retries_apply_once() {
    let f = fixture();
    let account = open(&f, dec!(50)).await;

    let request = ApplyTransactionRequest::debit(account, dec!(20)).with_idempotency_key("retry-storm");
    let outcomes = join_all((0..20).map(|_| f.engine.apply_transaction(request.clone()))).await;

    let outcomes: Vec<_> = outcomes.into_iter().map(|o| o.unwrap()).collect();
    let first_id = outcomes[0].transaction_id;
    assert!(outcomes.iter().all(|o| o.transaction_id == first_id));
    assert!(outcomes.iter().all(|o| o.balance == dec!(30)));
    assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);
    assert_eq!(f.query.get_balance(account).await.unwrap(), dec!(30));
}

#[tokio::test]
async fn test_locked_account_does_not_block_others() {
    let f = fixture();
    let busy = open(&f, dec!(10)).await;
    let free = open(&f, dec!(10)).await;

    // Hold the lock on `busy` from an open unit of work
    let mut held = f.repo.begin_transaction().await.unwrap();
    f.repo.read_balance_for_update(busy, &mut held).await.unwrap();

    let other = tokio::time::timeout(
        Duration::from_secs(2),
        f.engine.apply_transaction(ApplyTransactionRequest::credit(free, dec!(1))),
    )
    .await
    .expect("transaction on an unlocked account must not wait");
    assert_eq!(other.unwrap().balance, dec!(11));

    let blocked = tokio::time::timeout(
        Duration::from_millis(100),
        f.engine.apply_transaction(ApplyTransactionRequest::credit(busy, dec!(1))),
    )
    .await;
    assert!(blocked.is_err(), "transaction on a locked account must wait");

    held.rollback().await.unwrap();
}

#[tokio::test]
async fn test_abandoned_call_still_completes() {
    let f = fixture();
    let account = open(&f, dec!(10)).await;

    let mut held = f.repo.begin_transaction().await.unwrap();
    f.repo.read_balance_for_update(account, &mut held).await.unwrap();

    // The caller gives up while the unit of work waits for the lock
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        f.engine.apply_transaction(ApplyTransactionRequest::credit(account, dec!(5))),
    )
    .await;
    assert!(abandoned.is_err());

    held.rollback().await.unwrap();

    let mut balance = f.query.get_balance(account).await.unwrap();
    for _ in 0..100 {
        if balance == dec!(15) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        balance = f.query.get_balance(account).await.unwrap();
    }
    assert_eq!(balance, dec!(15));
    assert_eq!(f.query.get_history(account).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_credit_that_would_round_is_rejected() {
    let f = fixture();
    let opening = dec!(100000000000000000000.00);
    let account = open(&f, opening).await;

    let result = f
        .engine
        .apply_transaction(ApplyTransactionRequest::credit(account, dec!(0.0000000001)))
        .await;
    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidRequest);
    assert_eq!(f.query.get_balance(account).await.unwrap(), opening);
    assert!(f.query.get_history(account).await.unwrap().is_empty());

    let representable = f
        .engine
        .apply_transaction(ApplyTransactionRequest::credit(account, dec!(0.01)))
        .await
        .unwrap();
    assert_eq!(representable.balance - opening, dec!(0.01));
}

/// Where the storage below the engine breaks
#[derive(Clone, Copy, PartialEq)]
enum Fault {
    Begin,
    Write,
    Commit,
}

struct OfflineTransactionManager;

#[async_trait]
impl TransactionManager for OfflineTransactionManager {
    async fn begin_transaction(&self) -> Result<DBTransaction> {
        Err(Error::Database(sqlx::Error::PoolTimedOut))
    }
}

/// In-memory storage that fails at one chosen step
struct FaultyRepository {
    inner: InMemoryLedgerRepository,
    offline: OfflineTransactionManager,
    fault: Fault,
}

impl FaultyRepository {
    fn new(fault: Fault) -> Self {
        Self {
            inner: InMemoryLedgerRepository::new(),
            offline: OfflineTransactionManager,
            fault,
        }
    }
}

#[async_trait]
impl AccountStore for FaultyRepository {
    async fn create_account(&self, name: &str, opening_balance: Amount) -> Result<Account> {
        self.inner.create_account(name, opening_balance).await
    }

    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        self.inner.get_account(id).await
    }

    async fn read_balance_for_update(&self, account_id: Uuid, tx: &mut DBTransaction) -> Result<Option<Amount>> {
        self.inner.read_balance_for_update(account_id, tx).await
    }

    async fn write_balance(&self, account_id: Uuid, balance: Amount, tx: &mut DBTransaction) -> Result<()> {
        if self.fault == Fault::Write {
            return Err(Error::Database(sqlx::Error::Protocol("connection reset".to_string())));
        }
        self.inner.write_balance(account_id, balance, tx).await
    }

    async fn read_balance(&self, account_id: Uuid) -> Result<Option<Amount>> {
        self.inner.read_balance(account_id).await
    }
}

#[async_trait]
impl TransactionLog for FaultyRepository {
    async fn find_by_idempotency_key(&self, key: &str, tx: &mut DBTransaction) -> Result<Option<TransactionRecord>> {
        self.inner.find_by_idempotency_key(key, tx).await
    }

    async fn append(&self, record: &TransactionRecord, tx: &mut DBTransaction) -> Result<()> {
        self.inner.append(record, tx).await?;
        if self.fault == Fault::Commit {
            // Storage goes away between the append and the commit
            self.inner.close().await;
        }
        Ok(())
    }

    async fn list_by_account(&self, account_id: Uuid) -> Result<Vec<TransactionRecord>> {
        self.inner.list_by_account(account_id).await
    }

    async fn list_page(&self, account_id: Uuid, offset: usize, limit: usize) -> Result<Vec<TransactionRecord>> {
        self.inner.list_page(account_id, offset, limit).await
    }
}

#[async_trait]
impl LedgerRepository for FaultyRepository {
    fn transaction_manager(&self) -> &dyn TransactionManager {
        match self.fault {
            Fault::Begin => &self.offline,
            _ => self.inner.transaction_manager(),
        }
    }
}

async fn assert_storage_failure_leaves_no_trace(fault: Fault) {
    let repo = Arc::new(FaultyRepository::new(fault));
    let engine = LedgerEngine::new(repo.clone());
    let query = QueryService::new(repo.clone());
    let account = repo.create_account("Fragile", dec!(40.00)).await.unwrap().id;

    let err = engine
        .apply_transaction(ApplyTransactionRequest::debit(account, dec!(15.00)).with_idempotency_key("retry-me"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    assert!(err.is_retryable());
    assert_eq!(query.get_balance(account).await.unwrap(), dec!(40.00));
    assert!(query.get_history(account).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_begin_failure_is_retryable() {
    assert_storage_failure_leaves_no_trace(Fault::Begin).await;
}

#[tokio::test]
async fn test_database_error_inside_unit_of_work_is_retryable() {
    assert_storage_failure_leaves_no_trace(Fault::Write).await;
}

#[tokio::test]
async fn test_commit_failure_is_retryable() {
    assert_storage_failure_leaves_no_trace(Fault::Commit).await;
}
