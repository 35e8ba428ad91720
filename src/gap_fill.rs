// 🧩 Gap Filler - keep a card's balance history dense
//
// Every calendar day between the first and last recorded date gets an entry.
// Missing days are forward-filled from the nearest earlier day, so a run of
// missing days all carry the balance of the day before the run.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{LedgerError, Result};
use crate::model::BalanceEntry;
use crate::store::LedgerStore;

/// Outcome of one gap-filling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapFillReport {
    pub first: NaiveDate,
    pub last: NaiveDate,
    /// Number of days synthesized
    pub filled: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GapFiller;

impl GapFiller {
    pub fn new() -> Self {
        GapFiller
    }

    /// Fill every missing day in `(min_date, max_date]`.
    ///
    /// Existing entries are never modified and no date outside the recorded
    /// range is created. Cost grows with the calendar span, not the entry count.
    #[instrument(skip_all, fields(card = %ledger.card()))]
    pub fn fill<L: LedgerStore + ?Sized>(&self, ledger: &mut L) -> Result<GapFillReport> {
        let card = ledger.card();
        let (first, last) = match (ledger.min_date()?, ledger.max_date()?) {
            (Some(first), Some(last)) => (first, last),
            _ => return Err(LedgerError::EmptyLedger { card }),
        };

        let mut filled = 0;
        let mut day = first;
        while day < last {
            day = day.succ_opt().ok_or_else(|| LedgerError::InvalidDate {
                value: format!("day after {}", day),
            })?;

            if ledger.get(day)?.is_some() {
                continue;
            }

            // first < day, so a predecessor always exists
            let previous = ledger
                .floor_before(day)?
                .ok_or(LedgerError::EmptyLedger { card })?;
            ledger.upsert(BalanceEntry::new(day, previous.balance))?;
            filled += 1;
        }

        debug!(%first, %last, filled, "balance gaps filled");

        Ok(GapFillReport {
            first,
            last,
            filled,
        })
    }
}
