use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, info};

use crate::batch::{BatchProcessor, BatchSummary, CardDirectory, LedgerTransaction};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::events::{Event, ENTITY_CREDIT_CARD, EVENT_HISTORY_RECORDED};
use crate::model::{BalanceEntry, CardId, Correction};
use crate::store::{self, LedgerStore};

/// Fractional digits kept for persisted balances
pub const BALANCE_SCALE: u32 = 4;

pub const IMPORT_ACTOR: &str = "history_import";

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // ==========================================================================
    // Credit Cards (card directory)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS credit_cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            number TEXT UNIQUE NOT NULL,
            issuance_bank TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Balance History (one row per card per day)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS balance_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            card_id INTEGER NOT NULL REFERENCES credit_cards(id),
            date TEXT NOT NULL,
            balance_units INTEGER NOT NULL,
            UNIQUE (card_id, date)
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_balance_card_date ON balance_history(card_id, date)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Switch the database to WAL journaling for crash recovery
pub fn enable_wal(conn: &Connection) -> Result<String> {
    let mode = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;
    Ok(mode)
}

// ============================================================================
// AMOUNT ENCODING
// ============================================================================

/// Encode a balance as integer units of 10^-BALANCE_SCALE.
///
/// Amounts that need more fractional digits are rejected rather than rounded.
pub fn to_units(amount: Decimal) -> Result<i64> {
    let invalid = || LedgerError::InvalidAmount {
        value: amount.to_string(),
    };

    let units = amount
        .checked_mul(Decimal::from(10_i64.pow(BALANCE_SCALE)))
        .ok_or_else(invalid)?;
    if !units.fract().is_zero() {
        return Err(invalid());
    }
    units.to_i64().ok_or_else(invalid)
}

pub fn from_units(units: i64) -> Decimal {
    Decimal::new(units, BALANCE_SCALE).normalize()
}

// ============================================================================
// PER-CARD LEDGER
// ============================================================================

/// `LedgerStore` over the `balance_history` rows of one card
pub struct SqliteLedger<'c> {
    conn: &'c Connection,
    card: CardId,
}

impl<'c> SqliteLedger<'c> {
    pub fn new(conn: &'c Connection, card: CardId) -> Self {
        SqliteLedger { conn, card }
    }

    fn query_entry(&self, sql: &str, date: NaiveDate) -> Result<Option<BalanceEntry>> {
        let entry = self
            .conn
            .prepare_cached(sql)?
            .query_row(params![self.card.0, date], |row| {
                Ok(BalanceEntry::new(row.get(0)?, from_units(row.get(1)?)))
            })
            .optional()?;
        Ok(entry)
    }

    fn query_extreme(&self, sql: &str) -> Result<Option<NaiveDate>> {
        let date = self
            .conn
            .prepare_cached(sql)?
            .query_row(params![self.card.0], |row| row.get::<_, Option<NaiveDate>>(0))?;
        Ok(date)
    }
}

impl LedgerStore for SqliteLedger<'_> {
    fn card(&self) -> CardId {
        self.card
    }

    fn get(&self, date: NaiveDate) -> Result<Option<Decimal>> {
        let units = self
            .conn
            .prepare_cached(
                "SELECT balance_units FROM balance_history WHERE card_id = ?1 AND date = ?2",
            )?
            .query_row(params![self.card.0, date], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(units.map(from_units))
    }

    fn floor_before(&self, date: NaiveDate) -> Result<Option<BalanceEntry>> {
        self.query_entry(
            "SELECT date, balance_units FROM balance_history
             WHERE card_id = ?1 AND date < ?2
             ORDER BY date DESC LIMIT 1",
            date,
        )
    }

    fn ceiling_from(&self, date: NaiveDate) -> Result<Option<BalanceEntry>> {
        self.query_entry(
            "SELECT date, balance_units FROM balance_history
             WHERE card_id = ?1 AND date >= ?2
             ORDER BY date ASC LIMIT 1",
            date,
        )
    }

    fn min_date(&self) -> Result<Option<NaiveDate>> {
        self.query_extreme("SELECT MIN(date) FROM balance_history WHERE card_id = ?1")
    }

    fn max_date(&self) -> Result<Option<NaiveDate>> {
        self.query_extreme("SELECT MAX(date) FROM balance_history WHERE card_id = ?1")
    }

    fn upsert(&mut self, entry: BalanceEntry) -> Result<()> {
        let units = to_units(entry.balance)?;
        self.conn
            .prepare_cached(
                "INSERT INTO balance_history (card_id, date, balance_units)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (card_id, date) DO UPDATE SET balance_units = excluded.balance_units",
            )?
            .execute(params![self.card.0, entry.date, units])?;
        Ok(())
    }

    fn add_delta_after(&mut self, date: NaiveDate, delta: Decimal) -> Result<usize> {
        let units = to_units(delta)?;

        // SQLite would silently turn an overflowing sum into a REAL
        let (highest, lowest) = self
            .conn
            .prepare_cached(
                "SELECT MAX(balance_units), MIN(balance_units) FROM balance_history
                 WHERE card_id = ?1 AND date > ?2",
            )?
            .query_row(params![self.card.0, date], |row| {
                Ok((row.get::<_, Option<i64>>(0)?, row.get::<_, Option<i64>>(1)?))
            })?;
        for bound in highest.into_iter().chain(lowest) {
            if bound.checked_add(units).is_none() {
                return Err(LedgerError::InvalidAmount {
                    value: format!("{} + {}", from_units(bound), delta),
                });
            }
        }

        let touched = self
            .conn
            .prepare_cached(
                "UPDATE balance_history SET balance_units = balance_units + ?3
                 WHERE card_id = ?1 AND date > ?2",
            )?
            .execute(params![self.card.0, date, units])?;
        Ok(touched)
    }

    fn entries(&self) -> Result<Vec<BalanceEntry>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT date, balance_units FROM balance_history
             WHERE card_id = ?1
             ORDER BY date ASC",
        )?;

        let entries = stmt
            .query_map(params![self.card.0], |row| {
                Ok(BalanceEntry::new(row.get(0)?, from_units(row.get(1)?)))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(entries)
    }
}

// ============================================================================
// CARD DIRECTORY
// ============================================================================

pub fn find_card(conn: &Connection, card_number: &str) -> Result<Option<CardId>> {
    let id = conn
        .prepare_cached("SELECT id FROM credit_cards WHERE number = ?1")?
        .query_row(params![card_number], |row| row.get::<_, i64>(0))
        .optional()?;
    Ok(id.map(CardId))
}

pub fn insert_card(conn: &Connection, card_number: &str, issuance_bank: &str) -> Result<CardId> {
    let result = conn.execute(
        "INSERT INTO credit_cards (number, issuance_bank) VALUES (?1, ?2)",
        params![card_number, issuance_bank],
    );

    match result {
        Ok(_) => Ok(CardId(conn.last_insert_rowid())),
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(LedgerError::DuplicateCard {
                card_number: card_number.to_string(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

fn card_exists(conn: &Connection, card: CardId) -> Result<bool> {
    let exists = conn
        .prepare_cached("SELECT 1 FROM credit_cards WHERE id = ?1")?
        .exists(params![card.0])?;
    Ok(exists)
}

fn require_card(conn: &Connection, card: CardId) -> Result<()> {
    if card_exists(conn, card)? {
        Ok(())
    } else {
        Err(LedgerError::UnknownCard { card })
    }
}

// ============================================================================
// SQLITE BOOK
// ============================================================================

/// SQLite-backed card directory and balance histories
pub struct SqliteBook {
    conn: Connection,
}

impl SqliteBook {
    /// Open (creating if needed) the database described by `config`
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let conn = Connection::open(&config.database_path)?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        if config.wal {
            let mode = enable_wal(&conn)?;
            debug!(journal_mode = %mode, "journal mode set");
        }
        setup_database(&conn)?;
        info!(path = %config.database_path.display(), "ledger database opened");
        Ok(SqliteBook { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteBook { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn register_card(&self, card_number: &str, issuance_bank: &str) -> Result<CardId> {
        insert_card(&self.conn, card_number, issuance_bank)
    }

    /// Record a balance from normal card usage (outside any correction batch)
    pub fn record_balance(&self, card: CardId, entry: BalanceEntry) -> Result<()> {
        require_card(&self.conn, card)?;
        SqliteLedger::new(&self.conn, card).upsert(entry)
    }

    /// Load balance history rows in one transaction; any unknown card aborts the import
    pub fn import_history(&mut self, rows: &[Correction]) -> Result<usize> {
        let tx = self.begin()?;
        for row in rows {
            let card = tx
                .resolve_card(&row.card_number)?
                .ok_or_else(|| LedgerError::CardNotFound {
                    card_number: row.card_number.clone(),
                })?;
            SqliteLedger::new(&tx.tx, card).upsert(BalanceEntry::new(row.date, row.amount))?;
            Event::new(
                EVENT_HISTORY_RECORDED,
                ENTITY_CREDIT_CARD,
                &row.card_number,
                serde_json::json!({
                    "date": row.date,
                    "balance": row.amount.to_string(),
                }),
                IMPORT_ACTOR,
            )
            .append_to(&tx.tx)?;
        }
        tx.commit()?;
        Ok(rows.len())
    }

    pub fn ledger(&self, card: CardId) -> Result<SqliteLedger<'_>> {
        require_card(&self.conn, card)?;
        Ok(SqliteLedger::new(&self.conn, card))
    }

    pub fn history(&self, card: CardId) -> Result<Vec<BalanceEntry>> {
        self.ledger(card)?.entries()
    }

    pub fn query_balance(&self, card: CardId, date: NaiveDate) -> Result<Decimal> {
        store::query_balance(&self.ledger(card)?, date)
    }

    pub fn closest_entry(&self, card: CardId, date: NaiveDate) -> Result<BalanceEntry> {
        store::closest_entry(&self.ledger(card)?, date)
    }

    pub fn events_for_card(&self, card_number: &str) -> Result<Vec<Event>> {
        Event::trail(&self.conn, ENTITY_CREDIT_CARD, card_number)
    }

    /// Start an IMMEDIATE transaction; it holds the write lock until it ends
    pub fn begin(&mut self) -> Result<SqliteTransaction<'_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(SqliteTransaction { tx })
    }

    pub fn apply_batch(&mut self, corrections: &[Correction]) -> Result<BatchSummary> {
        BatchProcessor::new().apply_batch(self.begin()?, corrections)
    }
}

impl CardDirectory for SqliteBook {
    fn resolve_card(&self, card_number: &str) -> Result<Option<CardId>> {
        find_card(&self.conn, card_number)
    }
}

pub struct SqliteTransaction<'c> {
    tx: rusqlite::Transaction<'c>,
}

impl CardDirectory for SqliteTransaction<'_> {
    fn resolve_card(&self, card_number: &str) -> Result<Option<CardId>> {
        find_card(&self.tx, card_number)
    }
}

impl<'c> LedgerTransaction for SqliteTransaction<'c> {
    type Ledger<'t> = SqliteLedger<'t> where Self: 't;

    fn ledger(&mut self, card: CardId) -> Result<Self::Ledger<'_>> {
        Ok(SqliteLedger::new(&self.tx, card))
    }

    fn record_event(&mut self, event: &Event) -> Result<()> {
        event.append_to(&self.tx)
    }

    fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 4, d).unwrap()
    }

    /// Book with card "A-1111" holding [{4/10,100},{4/12,110}]
    fn create_test_book() -> (SqliteBook, CardId) {
        let book = SqliteBook::open_in_memory().unwrap();
        let card = book.register_card("A-1111", "Test Bank").unwrap();
        book.record_balance(card, BalanceEntry::new(day(10), dec!(100)))
            .unwrap();
        book.record_balance(card, BalanceEntry::new(day(12), dec!(110)))
            .unwrap();
        (book, card)
    }

    #[test]
    fn test_units_round_trip_and_precision() {
        assert_eq!(to_units(dec!(110.25)).unwrap(), 1_102_500);
        assert_eq!(from_units(1_102_500), dec!(110.25));
        assert_eq!(to_units(dec!(-0.0001)).unwrap(), -1);

        let err = to_units(dec!(1.00001)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    }

    #[test]
    fn test_sqlite_ledger_queries() {
        let (book, card) = create_test_book();
        let ledger = book.ledger(card).unwrap();

        assert_eq!(ledger.get(day(10)).unwrap(), Some(dec!(100)));
        assert_eq!(ledger.get(day(11)).unwrap(), None);
        assert_eq!(ledger.min_date().unwrap(), Some(day(10)));
        assert_eq!(ledger.max_date().unwrap(), Some(day(12)));
        assert_eq!(
            ledger.floor_before(day(12)).unwrap(),
            Some(BalanceEntry::new(day(10), dec!(100)))
        );
        assert_eq!(
            ledger.ceiling_from(day(11)).unwrap(),
            Some(BalanceEntry::new(day(12), dec!(110)))
        );
    }

    #[test]
    fn test_empty_card_extremes_are_none() {
        let book = SqliteBook::open_in_memory().unwrap();
        let card = book.register_card("E-0000", "Test Bank").unwrap();
        let ledger = book.ledger(card).unwrap();

        assert_eq!(ledger.min_date().unwrap(), None);
        assert_eq!(ledger.max_date().unwrap(), None);
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[test]
    fn test_closest_date_read() {
        let book = SqliteBook::open_in_memory().unwrap();
        let card = book.register_card("A-1111", "Test Bank").unwrap();
        book.record_balance(card, BalanceEntry::new(day(10), dec!(100)))
            .unwrap();
        book.record_balance(card, BalanceEntry::new(day(16), dec!(900)))
            .unwrap();

        assert_eq!(
            book.closest_entry(card, day(15)).unwrap(),
            BalanceEntry::new(day(16), dec!(900))
        );
    }

    #[test]
    fn test_duplicate_card_rejected() {
        let (book, _) = create_test_book();

        let err = book.register_card("A-1111", "Other Bank").unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateCard { .. }));
    }

    #[test]
    fn test_cascade_in_sqlite() {
        let (mut book, card) = create_test_book();

        let summary = book
            .apply_batch(&[Correction::new("A-1111", day(11), dec!(110))])
            .unwrap();

        assert_eq!(summary.days_filled(), 1);
        assert_eq!(
            book.history(card).unwrap(),
            vec![
                BalanceEntry::new(day(10), dec!(100)),
                BalanceEntry::new(day(11), dec!(110)),
                BalanceEntry::new(day(12), dec!(120)),
            ]
        );

        let events = book.events_for_card("A-1111").unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, vec!["balance_gaps_filled", "balance_corrected"]);
    }

    #[test]
    fn test_batch_atomicity_in_sqlite() {
        let (mut book, card) = create_test_book();
        let before = book.history(card).unwrap();

        let err = book
            .apply_batch(&[
                Correction::new("A-1111", day(11), dec!(110)),
                Correction::new("B-2222", day(11), dec!(50)),
            ])
            .unwrap_err();

        assert!(matches!(err, LedgerError::CardNotFound { ref card_number } if card_number == "B-2222"));
        assert_eq!(book.history(card).unwrap(), before);
        assert!(book.events_for_card("A-1111").unwrap().is_empty());
    }

    #[test]
    fn test_rollback_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            database_path: dir.path().join("ledger.db"),
            ..LedgerConfig::default()
        };

        let card = {
            let mut book = SqliteBook::open(&config).unwrap();
            let card = book.register_card("A-1111", "Test Bank").unwrap();
            book.record_balance(card, BalanceEntry::new(day(10), dec!(100)))
                .unwrap();
            book.record_balance(card, BalanceEntry::new(day(12), dec!(110)))
                .unwrap();

            // Second item needs more precision than the store keeps
            let err = book
                .apply_batch(&[
                    Correction::new("A-1111", day(11), dec!(110)),
                    Correction::new("A-1111", day(12), dec!(0.00001)),
                ])
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount { .. }));
            card
        };

        let book = SqliteBook::open(&config).unwrap();
        assert_eq!(
            book.history(card).unwrap(),
            vec![
                BalanceEntry::new(day(10), dec!(100)),
                BalanceEntry::new(day(12), dec!(110)),
            ]
        );
    }

    #[test]
    fn test_cascade_out_of_unit_range_rolls_back() {
        let mut book = SqliteBook::open_in_memory().unwrap();
        let card = book.register_card("A-1111", "Test Bank").unwrap();
        book.record_balance(card, BalanceEntry::new(day(10), dec!(900000000000000)))
            .unwrap();
        // 9.22e18 units, just under i64::MAX
        book.record_balance(card, BalanceEntry::new(day(12), dec!(922000000000000)))
            .unwrap();
        let before = book.history(card).unwrap();

        let err = book
            .apply_batch(&[Correction::new("A-1111", day(11), dec!(901000000000000))])
            .unwrap_err();

        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
        assert_eq!(book.history(card).unwrap(), before);
        assert!(book.events_for_card("A-1111").unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_batch_times_out_on_write_lock() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            database_path: dir.path().join("ledger.db"),
            busy_timeout_ms: 50,
            ..LedgerConfig::default()
        };

        let mut holder = SqliteBook::open(&config).unwrap();
        let card = holder.register_card("A-1111", "Test Bank").unwrap();
        holder
            .record_balance(card, BalanceEntry::new(day(10), dec!(100)))
            .unwrap();
        holder
            .record_balance(card, BalanceEntry::new(day(12), dec!(110)))
            .unwrap();
        let mut contender = SqliteBook::open(&config).unwrap();
        let before = contender.history(card).unwrap();

        {
            let _lock = holder.begin().unwrap();

            let err = contender
                .apply_batch(&[Correction::new("A-1111", day(11), dec!(110))])
                .unwrap_err();
            assert!(matches!(err, LedgerError::Storage(_)));
        }

        assert_eq!(contender.history(card).unwrap(), before);
        assert!(contender.events_for_card("A-1111").unwrap().is_empty());

        // Lock released: the same batch now goes through
        contender
            .apply_batch(&[Correction::new("A-1111", day(11), dec!(110))])
            .unwrap();
        assert_eq!(contender.query_balance(card, day(12)).unwrap(), dec!(120));
    }

    #[test]
    fn test_import_history() {
        let mut book = SqliteBook::open_in_memory().unwrap();
        let card = book.register_card("A-1111", "Test Bank").unwrap();

        let imported = book
            .import_history(&[
                Correction::new("A-1111", day(10), dec!(800)),
                Correction::new("A-1111", day(13), dec!(1100)),
            ])
            .unwrap();

        assert_eq!(imported, 2);
        assert_eq!(book.query_balance(card, day(13)).unwrap(), dec!(1100));

        // Unknown card rolls the whole import back
        let err = book
            .import_history(&[
                Correction::new("A-1111", day(14), dec!(5)),
                Correction::new("Z-9999", day(14), dec!(5)),
            ])
            .unwrap_err();
        assert!(matches!(err, LedgerError::CardNotFound { .. }));
        assert_eq!(book.history(card).unwrap().len(), 2);
    }

    #[test]
    fn test_record_balance_unknown_card() {
        let book = SqliteBook::open_in_memory().unwrap();

        let err = book
            .record_balance(CardId(77), BalanceEntry::new(day(10), dec!(1)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownCard { card: CardId(77) }));
    }
}
