//! Decimal type utilities for exact monetary arithmetic

pub use rust_decimal::Decimal;
pub use rust_decimal_macros::dec;

use crate::error::{Error, Result};

/// Monetary amount; never a float
pub type Amount = Decimal;

/// Parse an amount from its textual form without any rounding
pub fn parse_amount(raw: &str) -> Result<Amount> {
    let trimmed = raw.trim();
    let mut amount = trimmed
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(trimmed))
        .map_err(|e| Error::InvalidRequest(format!("amount {:?} is not a decimal number: {}", raw, e)))?;
    // At least two places so 150 and 150.00 display alike
    if amount.scale() < 2 {
        amount.rescale(2);
    }
    Ok(amount)
}

/// Add `amount` to `balance`, failing on overflow or when the sum cannot be
/// represented without rounding
pub fn checked_credit(balance: Amount, amount: Amount) -> Result<Amount> {
    let sum = balance
        .checked_add(amount)
        .ok_or_else(|| Error::InvalidRequest(format!("credit of {} overflows balance {}", amount, balance)))?;
    exact(sum, balance, amount, "credit")
}

/// Subtract `amount` from `balance`, failing on overflow or when the
/// difference cannot be represented without rounding
pub fn checked_debit(balance: Amount, amount: Amount) -> Result<Amount> {
    let difference = balance
        .checked_sub(amount)
        .ok_or_else(|| Error::InvalidRequest(format!("debit of {} overflows balance {}", amount, balance)))?;
    exact(difference, balance, amount, "debit")
}

// Decimal keeps the larger operand scale unless the mantissa ran out of digits
// and the result was rounded
fn exact(result: Amount, balance: Amount, amount: Amount, operation: &str) -> Result<Amount> {
    if result.scale() < balance.scale().max(amount.scale()) {
        return Err(Error::InvalidRequest(format!(
            "{} of {} on balance {} needs more precision than a balance can hold",
            operation, amount, balance
        )));
    }
    Ok(result)
}
