//! Domain models for the ledger

pub mod account;
pub mod transaction;

pub use account::Account;
pub use transaction::{
    ApplyTransactionRequest, HistoryPage, RawTransactionRequest, TransactionKind,
    TransactionOutcome, TransactionRecord,
};
