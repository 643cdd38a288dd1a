//! Ledger service: per-account balances with an append-only transaction log
//!
//! Credits and debits go through [`LedgerEngine`], which applies each one in a
//! single unit of work with a per-account lock and an idempotency check.
//! Balances and history are read through [`QueryService`].

pub mod config;
pub mod engine;
pub mod query;
pub mod repository;
pub mod service;

pub use config::LedgerConfig;
pub use engine::LedgerEngine;
pub use query::QueryService;
pub use repository::{AccountStore, InMemoryLedgerRepository, LedgerRepository, PostgresLedgerRepository, TransactionLog};
pub use service::{LedgerService, RepositoryType};
