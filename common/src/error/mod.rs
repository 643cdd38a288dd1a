//! Error types for the ledger
//!
//! This module provides the error taxonomy shared by the storage layer, the
//! transaction engine and the query service. Every error carries a kind and a
//! human-readable message so callers can tell a business-rule rejection apart
//! from an infrastructure failure.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Ledger error type
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed input from the caller
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error when an account cannot be found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Error when a debit exceeds the current balance
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Storage could not start or commit a unit of work
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Another unit of work already committed this idempotency key.
    /// The engine turns this into a replay and never returns it to callers.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Database migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`] as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    AccountNotFound,
    InsufficientFunds,
    StorageUnavailable,
    Internal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::AccountNotFound => "account_not_found",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Classify this error for callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::AccountNotFound(_) => ErrorKind::AccountNotFound,
            Error::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            Error::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
            Error::Database(e) if is_connection_error(e) => ErrorKind::StorageUnavailable,
            Error::DuplicateIdempotencyKey(_)
            | Error::ConfigurationError(_)
            | Error::Internal(_)
            | Error::Database(_)
            | Error::Migration(_)
            | Error::Serialization(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may safely retry the same request.
    ///
    /// Only storage failures qualify: a unit of work that failed to begin or
    /// commit left no partial state behind.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::StorageUnavailable
    }

    /// Wrap a storage-level failure as [`Error::StorageUnavailable`]
    pub fn storage_unavailable<E: Display>(context: &str, err: E) -> Self {
        Error::StorageUnavailable(format!("{}: {}", context, err))
    }
}

fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait to add context to error results
pub trait ErrorExt<T> {
    /// Add context information to an error
    fn with_context<C, F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Display;
}

impl<T> ErrorExt<T> for Result<T> {
    fn with_context<C, F>(self, context_fn: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Display,
    {
        self.map_err(|e| {
            let context = context_fn().to_string();
            match e {
                Error::InvalidRequest(msg) => Error::InvalidRequest(format!("{}: {}", context, msg)),
                Error::AccountNotFound(msg) => Error::AccountNotFound(format!("{}: {}", context, msg)),
                Error::InsufficientFunds(msg) => Error::InsufficientFunds(format!("{}: {}", context, msg)),
                Error::StorageUnavailable(msg) => Error::StorageUnavailable(format!("{}: {}", context, msg)),
                Error::ConfigurationError(msg) => Error::ConfigurationError(format!("{}: {}", context, msg)),
                Error::Internal(msg) => Error::Internal(format!("{}: {}", context, msg)),
                // The key is matched on later, keep it bare
                Error::DuplicateIdempotencyKey(key) => Error::DuplicateIdempotencyKey(key),
                Error::Database(e) => Error::Database(e),
                Error::Migration(e) => Error::Migration(e),
                Error::Serialization(e) => Error::Serialization(e),
            }
        })
    }
}
