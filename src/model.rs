// Ledger data model: cards, daily balance entries and corrections

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, Result};

/// Date format used at every text boundary (CSV, CLI, SQLite columns)
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ============================================================================
// CARD IDENTITY
// ============================================================================

/// Internal identifier of a credit card. Each card owns exactly one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardId(pub i64);

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// BALANCE ENTRY
// ============================================================================

/// One day of a card's balance history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceEntry {
    pub date: NaiveDate,
    pub balance: Decimal,
}

impl BalanceEntry {
    pub fn new(date: NaiveDate, balance: Decimal) -> Self {
        BalanceEntry { date, balance }
    }
}

// ============================================================================
// CORRECTION
// ============================================================================

/// An externally supplied assertion that a card's balance on `date` is `amount`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Correction {
    pub card_number: String,
    pub date: NaiveDate,
    pub amount: Decimal,
}

impl Correction {
    pub fn new(card_number: impl Into<String>, date: NaiveDate, amount: Decimal) -> Self {
        Correction {
            card_number: card_number.into(),
            date,
            amount,
        }
    }

    /// Build a correction from raw text fields, validating date and amount
    pub fn parse(card_number: &str, date: &str, amount: &str) -> Result<Self> {
        Ok(Correction {
            card_number: card_number.trim().to_string(),
            date: parse_balance_date(date)?,
            amount: parse_amount(amount)?,
        })
    }
}

/// Parse an ISO calendar date (`YYYY-MM-DD`)
pub fn parse_balance_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, DATE_FORMAT).map_err(|_| LedgerError::InvalidDate {
        value: raw.to_string(),
    })
}

/// Parse a decimal amount. Accepts an optional leading `$` and thousands separators.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '$')
        .collect();

    Decimal::from_str(&cleaned).map_err(|_| LedgerError::InvalidAmount {
        value: raw.trim().to_string(),
    })
}
