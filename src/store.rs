// 📒 Ledger Store - ordered (date → balance) collection for one card
//
// Every backing store (in-memory, SQLite) exposes the same per-card contract.
// Gap filling and corrections are written against this trait only.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

use crate::error::{LedgerError, Result};
use crate::model::{BalanceEntry, CardId};

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Ordered balance history of a single card.
///
/// Dates are unique keys. All queries and mutations are scoped to `card()`.
pub trait LedgerStore {
    /// Card that owns this ledger
    fn card(&self) -> CardId;

    /// Balance recorded exactly on `date`
    fn get(&self, date: NaiveDate) -> Result<Option<Decimal>>;

    /// Latest entry strictly before `date`
    fn floor_before(&self, date: NaiveDate) -> Result<Option<BalanceEntry>>;

    /// Earliest entry on or after `date`
    fn ceiling_from(&self, date: NaiveDate) -> Result<Option<BalanceEntry>>;

    fn min_date(&self) -> Result<Option<NaiveDate>>;

    fn max_date(&self) -> Result<Option<NaiveDate>>;

    /// Insert the entry, overwriting any balance already stored on that date
    fn upsert(&mut self, entry: BalanceEntry) -> Result<()>;

    /// Add `delta` to every entry dated strictly after `date`.
    ///
    /// Returns the number of entries touched.
    fn add_delta_after(&mut self, date: NaiveDate, delta: Decimal) -> Result<usize>;

    /// Full history in ascending date order
    fn entries(&self) -> Result<Vec<BalanceEntry>>;
}

impl<L: LedgerStore + ?Sized> LedgerStore for &mut L {
    fn card(&self) -> CardId {
        (**self).card()
    }

    fn get(&self, date: NaiveDate) -> Result<Option<Decimal>> {
        (**self).get(date)
    }

    fn floor_before(&self, date: NaiveDate) -> Result<Option<BalanceEntry>> {
        (**self).floor_before(date)
    }

    fn ceiling_from(&self, date: NaiveDate) -> Result<Option<BalanceEntry>> {
        (**self).ceiling_from(date)
    }

    fn min_date(&self) -> Result<Option<NaiveDate>> {
        (**self).min_date()
    }

    fn max_date(&self) -> Result<Option<NaiveDate>> {
        (**self).max_date()
    }

    fn upsert(&mut self, entry: BalanceEntry) -> Result<()> {
        (**self).upsert(entry)
    }

    fn add_delta_after(&mut self, date: NaiveDate, delta: Decimal) -> Result<usize> {
        (**self).add_delta_after(date, delta)
    }

    fn entries(&self) -> Result<Vec<BalanceEntry>> {
        (**self).entries()
    }
}

// ============================================================================
// POINT READS
// ============================================================================

/// Balance on exactly `date`, or `BalanceNotFound`
pub fn query_balance<L: LedgerStore + ?Sized>(ledger: &L, date: NaiveDate) -> Result<Decimal> {
    ledger
        .get(date)?
        .ok_or(LedgerError::BalanceNotFound {
            card: ledger.card(),
            date,
        })
}

/// Entry on `date` if recorded, otherwise the nearest later entry.
///
/// Example: history `[04-10, 04-16]`, query `04-15` → the `04-16` entry.
pub fn closest_entry<L: LedgerStore + ?Sized>(ledger: &L, date: NaiveDate) -> Result<BalanceEntry> {
    ledger
        .ceiling_from(date)?
        .ok_or(LedgerError::BalanceNotFound {
            card: ledger.card(),
            date,
        })
}

// ============================================================================
// IN-MEMORY LEDGER
// ============================================================================

/// `BTreeMap`-backed ledger; O(log n) point, floor and ceiling access
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryLedger {
    card: CardId,
    balances: BTreeMap<NaiveDate, Decimal>,
}

impl MemoryLedger {
    pub fn new(card: CardId) -> Self {
        MemoryLedger {
            card,
            balances: BTreeMap::new(),
        }
    }

    pub fn from_entries(card: CardId, entries: impl IntoIterator<Item = BalanceEntry>) -> Self {
        MemoryLedger {
            card,
            balances: entries.into_iter().map(|e| (e.date, e.balance)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }
}

impl LedgerStore for MemoryLedger {
    fn card(&self) -> CardId {
        self.card
    }

    fn get(&self, date: NaiveDate) -> Result<Option<Decimal>> {
        Ok(self.balances.get(&date).copied())
    }

    fn floor_before(&self, date: NaiveDate) -> Result<Option<BalanceEntry>> {
        Ok(self
            .balances
            .range(..date)
            .next_back()
            .map(|(d, b)| BalanceEntry::new(*d, *b)))
    }

    fn ceiling_from(&self, date: NaiveDate) -> Result<Option<BalanceEntry>> {
        Ok(self
            .balances
            .range(date..)
            .next()
            .map(|(d, b)| BalanceEntry::new(*d, *b)))
    }

    fn min_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.balances.keys().next().copied())
    }

    fn max_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.balances.keys().next_back().copied())
    }

    fn upsert(&mut self, entry: BalanceEntry) -> Result<()> {
        self.balances.insert(entry.date, entry.balance);
        Ok(())
    }

    fn add_delta_after(&mut self, date: NaiveDate, delta: Decimal) -> Result<usize> {
        // Check every sum before writing any of them
        let shifted = self
            .balances
            .range((Excluded(date), Unbounded))
            .map(|(_, balance)| {
                balance
                    .checked_add(delta)
                    .ok_or_else(|| LedgerError::InvalidAmount {
                        value: format!("{} + {}", balance, delta),
                    })
            })
            .collect::<Result<Vec<Decimal>>>()?;

        let touched = shifted.len();
        for ((_, balance), new_balance) in self
            .balances
            .range_mut((Excluded(date), Unbounded))
            .zip(shifted)
        {
            *balance = new_balance;
        }
        Ok(touched)
    }

    fn entries(&self) -> Result<Vec<BalanceEntry>> {
        Ok(self
            .balances
            .iter()
            .map(|(d, b)| BalanceEntry::new(*d, *b))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 4, d).unwrap()
    }

    fn sample_ledger() -> MemoryLedger {
        MemoryLedger::from_entries(
            CardId(1),
            vec![
                BalanceEntry::new(day(10), dec!(800)),
                BalanceEntry::new(day(11), dec!(1000)),
                BalanceEntry::new(day(12), dec!(1200)),
                BalanceEntry::new(day(13), dec!(1100)),
                BalanceEntry::new(day(16), dec!(900)),
            ],
        )
    }

    #[test]
    fn test_point_and_extreme_queries() {
        let ledger = sample_ledger();

        assert_eq!(ledger.get(day(12)).unwrap(), Some(dec!(1200)));
        assert_eq!(ledger.get(day(14)).unwrap(), None);
        assert_eq!(ledger.min_date().unwrap(), Some(day(10)));
        assert_eq!(ledger.max_date().unwrap(), Some(day(16)));

        let empty = MemoryLedger::new(CardId(2));
        assert_eq!(empty.min_date().unwrap(), None);
        assert_eq!(empty.max_date().unwrap(), None);
    }

    #[test]
    fn test_floor_before_is_strict() {
        let ledger = sample_ledger();

        assert_eq!(
            ledger.floor_before(day(13)).unwrap(),
            Some(BalanceEntry::new(day(12), dec!(1200)))
        );
        assert_eq!(
            ledger.floor_before(day(15)).unwrap(),
            Some(BalanceEntry::new(day(13), dec!(1100)))
        );
        assert_eq!(ledger.floor_before(day(10)).unwrap(), None);
    }

    #[test]
    fn test_closest_date_uses_ceiling() {
        let ledger = MemoryLedger::from_entries(
            CardId(1),
            vec![
                BalanceEntry::new(day(10), dec!(100)),
                BalanceEntry::new(day(16), dec!(900)),
            ],
        );

        let closest = closest_entry(&ledger, day(15)).unwrap();
        assert_eq!(closest, BalanceEntry::new(day(16), dec!(900)));

        // Exact hit wins over the next entry
        let exact = closest_entry(&ledger, day(10)).unwrap();
        assert_eq!(exact, BalanceEntry::new(day(10), dec!(100)));

        // Nothing on or after the last date
        let err = closest_entry(&ledger, day(17)).unwrap_err();
        assert!(matches!(err, LedgerError::BalanceNotFound { .. }));
    }

    #[test]
    fn test_query_balance_not_found() {
        let ledger = sample_ledger();

        assert_eq!(query_balance(&ledger, day(11)).unwrap(), dec!(1000));

        let err = query_balance(&ledger, day(14)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::BalanceNotFound { card: CardId(1), date } if date == day(14)
        ));
    }

    #[test]
    fn test_add_delta_after_only_touches_later_days() {
        let mut ledger = sample_ledger();

        let touched = ledger.add_delta_after(day(12), dec!(-50)).unwrap();

        assert_eq!(touched, 2);
        assert_eq!(ledger.get(day(10)).unwrap(), Some(dec!(800)));
        assert_eq!(ledger.get(day(12)).unwrap(), Some(dec!(1200)));
        assert_eq!(ledger.get(day(13)).unwrap(), Some(dec!(1050)));
        assert_eq!(ledger.get(day(16)).unwrap(), Some(dec!(850)));
    }

    #[test]
    fn test_add_delta_after_overflow_leaves_ledger_intact() {
        let mut ledger = MemoryLedger::from_entries(
            CardId(1),
            vec![
                BalanceEntry::new(day(10), dec!(0)),
                BalanceEntry::new(day(11), dec!(1)),
                BalanceEntry::new(day(12), Decimal::MAX),
            ],
        );
        let before = ledger.clone();

        let err = ledger.add_delta_after(day(10), dec!(1)).unwrap_err();

        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
        // day 11 would have fit, but nothing is written
        assert_eq!(ledger, before);
    }

    #[test]
    fn test_upsert_overwrites_existing_date() {
        let mut ledger = sample_ledger();

        ledger.upsert(BalanceEntry::new(day(11), dec!(5))).unwrap();
        ledger.upsert(BalanceEntry::new(day(14), dec!(6))).unwrap();

        assert_eq!(ledger.len(), 6);
        assert_eq!(ledger.get(day(11)).unwrap(), Some(dec!(5)));

        let dates: Vec<NaiveDate> = ledger.entries().unwrap().iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![day(10), day(11), day(12), day(13), day(14), day(16)]);
    }
}
