use chrono::NaiveDate;
use thiserror::Error;

use crate::model::CardId;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by the ledger engine.
///
/// Any of these aborts the batch it occurs in; nothing is retried internally.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no credit card found for number {card_number}")]
    CardNotFound { card_number: String },

    #[error("no credit card with id {card}")]
    UnknownCard { card: CardId },

    #[error("card {card} has no balance history")]
    EmptyLedger { card: CardId },

    #[error("invalid balance date: {value}")]
    InvalidDate { value: String },

    #[error("invalid balance amount: {value}")]
    InvalidAmount { value: String },

    #[error("no balance recorded for card {card} on {date}")]
    BalanceNotFound { card: CardId, date: NaiveDate },

    #[error("credit card {card_number} is already registered")]
    DuplicateCard { card_number: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`LedgerError`], for callers that map errors
/// onto response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CardNotFound,
    EmptyLedger,
    InvalidDate,
    InvalidAmount,
    NotFound,
    Conflict,
    Internal,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::CardNotFound { .. } | LedgerError::UnknownCard { .. } => {
                ErrorKind::CardNotFound
            }
            LedgerError::EmptyLedger { .. } => ErrorKind::EmptyLedger,
            LedgerError::InvalidDate { .. } => ErrorKind::InvalidDate,
            LedgerError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            LedgerError::BalanceNotFound { .. } => ErrorKind::NotFound,
            LedgerError::DuplicateCard { .. } => ErrorKind::Conflict,
            LedgerError::Storage(_) | LedgerError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinguishable() {
        let not_found = LedgerError::CardNotFound {
            card_number: "4111".to_string(),
        };
        let empty = LedgerError::EmptyLedger { card: CardId(7) };
        let bad_date = LedgerError::InvalidDate {
            value: "2024-02-30".to_string(),
        };

        assert_eq!(not_found.kind(), ErrorKind::CardNotFound);
        assert_eq!(empty.kind(), ErrorKind::EmptyLedger);
        assert_eq!(bad_date.kind(), ErrorKind::InvalidDate);

        assert_eq!(
            not_found.to_string(),
            "no credit card found for number 4111"
        );
        assert_eq!(empty.to_string(), "card 7 has no balance history");
    }

    #[test]
    fn test_unknown_card_id_is_not_a_card_number() {
        let err = LedgerError::UnknownCard { card: CardId(77) };

        assert_eq!(err.kind(), ErrorKind::CardNotFound);
        assert_eq!(err.to_string(), "no credit card with id 77");
    }
}
