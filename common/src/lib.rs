//! Common types and utilities for the ledger
//!
//! This library contains the shared types used by the ledger service: the
//! error taxonomy, exact decimal amounts, the account and transaction models,
//! and the unit-of-work abstraction over PostgreSQL and in-memory storage.

pub mod error;
pub mod model;
pub mod decimal;
pub mod db;

/// Re-export important types
pub use error::{Error, ErrorExt, ErrorKind, Result};
pub use decimal::*;

// Re-export database types
pub use db::transaction::{DBTransaction, TransactionManager};
