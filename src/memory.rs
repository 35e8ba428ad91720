// In-memory backing store: card directory, per-card ledgers and audit trail.
//
// Transactions are copy-on-write: a ledger is cloned the first time a batch
// touches it, and the clones replace the originals only on commit.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::collections::HashMap;

use crate::batch::{BatchProcessor, BatchSummary, CardDirectory, LedgerTransaction};
use crate::error::{LedgerError, Result};
use crate::events::{Event, ENTITY_CREDIT_CARD};
use crate::model::{BalanceEntry, CardId, Correction};
use crate::store::{self, LedgerStore, MemoryLedger};

#[derive(Debug, Default)]
pub struct MemoryBook {
    cards: HashMap<String, CardId>,
    ledgers: HashMap<CardId, MemoryLedger>,
    events: Vec<Event>,
    next_card: i64,
}

impl MemoryBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a card number and give it an empty ledger
    pub fn register_card(&mut self, card_number: &str) -> Result<CardId> {
        if self.cards.contains_key(card_number) {
            return Err(LedgerError::DuplicateCard {
                card_number: card_number.to_string(),
            });
        }

        self.next_card += 1;
        let card = CardId(self.next_card);
        self.cards.insert(card_number.to_string(), card);
        self.ledgers.insert(card, MemoryLedger::new(card));
        Ok(card)
    }

    /// Record a balance from normal card usage (outside any correction batch)
    pub fn record_balance(&mut self, card: CardId, entry: BalanceEntry) -> Result<()> {
        self.ledger_mut(card)?.upsert(entry)
    }

    pub fn ledger(&self, card: CardId) -> Result<&MemoryLedger> {
        self.ledgers.get(&card).ok_or_else(|| unknown_card(card))
    }

    fn ledger_mut(&mut self, card: CardId) -> Result<&mut MemoryLedger> {
        self.ledgers.get_mut(&card).ok_or_else(|| unknown_card(card))
    }

    pub fn history(&self, card: CardId) -> Result<Vec<BalanceEntry>> {
        self.ledger(card)?.entries()
    }

    pub fn query_balance(&self, card: CardId, date: NaiveDate) -> Result<Decimal> {
        store::query_balance(self.ledger(card)?, date)
    }

    pub fn closest_entry(&self, card: CardId, date: NaiveDate) -> Result<BalanceEntry> {
        store::closest_entry(self.ledger(card)?, date)
    }

    pub fn events_for_card(&self, card_number: &str) -> Vec<&Event> {
        self.events
            .iter()
            .filter(|e| e.entity_type == ENTITY_CREDIT_CARD && e.entity_id == card_number)
            .collect()
    }

    /// Start a transaction. The book is exclusively borrowed until it ends.
    pub fn begin(&mut self) -> MemoryTransaction<'_> {
        MemoryTransaction {
            book: self,
            staged: HashMap::new(),
            events: Vec::new(),
        }
    }

    pub fn apply_batch(&mut self, corrections: &[Correction]) -> Result<BatchSummary> {
        BatchProcessor::new().apply_batch(self.begin(), corrections)
    }
}

impl CardDirectory for MemoryBook {
    fn resolve_card(&self, card_number: &str) -> Result<Option<CardId>> {
        Ok(self.cards.get(card_number).copied())
    }
}

fn unknown_card(card: CardId) -> LedgerError {
    LedgerError::UnknownCard { card }
}

// ============================================================================
// TRANSACTION
// ============================================================================

pub struct MemoryTransaction<'b> {
    book: &'b mut MemoryBook,
    staged: HashMap<CardId, MemoryLedger>,
    events: Vec<Event>,
}

impl CardDirectory for MemoryTransaction<'_> {
    fn resolve_card(&self, card_number: &str) -> Result<Option<CardId>> {
        self.book.resolve_card(card_number)
    }
}

impl<'b> LedgerTransaction for MemoryTransaction<'b> {
    type Ledger<'t> = &'t mut MemoryLedger where Self: 't;

    fn ledger(&mut self, card: CardId) -> Result<Self::Ledger<'_>> {
        if !self.staged.contains_key(&card) {
            let original = self.book.ledger(card)?.clone();
            self.staged.insert(card, original);
        }
        self.staged.get_mut(&card).ok_or_else(|| unknown_card(card))
    }

    fn record_event(&mut self, event: &Event) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn commit(self) -> Result<()> {
        let MemoryTransaction {
            book,
            staged,
            events,
        } = self;

        book.ledgers.extend(staged);
        book.events.extend(events);
        Ok(())
    }
}
