// ⚖️ Balance Corrector - apply a (date, balance) assertion to one ledger
//
// The discrepancy between the asserted and the stored balance is written to the
// corrected day and then added to every later day, so day-to-day movements
// after the correction are preserved.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{LedgerError, Result};
use crate::model::BalanceEntry;
use crate::store::LedgerStore;

// ============================================================================
// CORRECTION OUTCOME
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CorrectionOutcome {
    /// No entry existed on the date; a new one was created without cascading
    Inserted { balance: Decimal },

    /// Stored balance already matched
    Unchanged { balance: Decimal },

    /// Stored balance differed; the delta was applied to the day and every later day
    Adjusted {
        previous: Decimal,
        balance: Decimal,
        delta: Decimal,
        cascaded: usize,
    },
}

impl CorrectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionOutcome::Inserted { .. } => "inserted",
            CorrectionOutcome::Unchanged { .. } => "unchanged",
            CorrectionOutcome::Adjusted { .. } => "adjusted",
        }
    }

    pub fn delta(&self) -> Decimal {
        match self {
            CorrectionOutcome::Adjusted { delta, .. } => *delta,
            _ => Decimal::ZERO,
        }
    }

    pub fn is_change(&self) -> bool {
        !matches!(self, CorrectionOutcome::Unchanged { .. })
    }
}

// ============================================================================
// CORRECTOR
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct BalanceCorrector;

impl BalanceCorrector {
    pub fn new() -> Self {
        BalanceCorrector
    }

    /// Set the balance on `date` to `balance` and cascade the difference forward.
    ///
    /// Entries before `date` are never read or written. When `date` has no
    /// entry yet the value is inserted as-is and later days are left alone,
    /// even if `date` falls inside the recorded range.
    #[instrument(skip_all, fields(card = %ledger.card(), date = %date))]
    pub fn apply<L: LedgerStore + ?Sized>(
        &self,
        ledger: &mut L,
        date: NaiveDate,
        balance: Decimal,
    ) -> Result<CorrectionOutcome> {
        let stored = match ledger.get(date)? {
            Some(stored) => stored,
            None => {
                ledger.upsert(BalanceEntry::new(date, balance))?;
                debug!(%balance, "inserted balance on a new date");
                return Ok(CorrectionOutcome::Inserted { balance });
            }
        };

        let delta = balance
            .checked_sub(stored)
            .ok_or_else(|| LedgerError::InvalidAmount {
                value: format!("{} - {}", balance, stored),
            })?;
        debug!(%delta, "difference against stored balance");

        if delta.is_zero() {
            return Ok(CorrectionOutcome::Unchanged { balance });
        }

        // Later days first: a failed cascade leaves the ledger untouched
        let cascaded = ledger.add_delta_after(date, delta)?;
        ledger.upsert(BalanceEntry::new(date, balance))?;

        Ok(CorrectionOutcome::Adjusted {
            previous: stored,
            balance,
            delta,
            cascaded,
        })
    }
}
