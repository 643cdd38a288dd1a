//! Account models and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Amount;
use crate::error::{Error, Result};

/// Account model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account ID
    pub id: Uuid,
    /// Customer name given at opening time
    pub name: String,
    /// Current committed balance
    pub balance: Amount,
    /// Account creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Open a new account, validating the name and opening balance
    pub fn open(name: &str, opening_balance: Amount) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidRequest("account name must not be empty".to_string()));
        }
        if opening_balance < Amount::ZERO {
            return Err(Error::InvalidRequest(format!(
                "opening balance must not be negative: {}",
                opening_balance
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            balance: opening_balance,
            created_at: Utc::now(),
        })
    }
}
