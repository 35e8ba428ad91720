// 📦 Batch Processor - apply an ordered list of corrections atomically
//
// Each item resolves its card, gap-fills that card's ledger and applies the
// correction. The whole batch runs inside one transaction object: it is
// committed after the last item, and dropped (rolled back) on the first error.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::corrector::{BalanceCorrector, CorrectionOutcome};
use crate::error::{LedgerError, Result};
use crate::events::Event;
use crate::gap_fill::GapFiller;
use crate::model::{CardId, Correction};
use crate::store::LedgerStore;

pub const BATCH_ACTOR: &str = "batch_processor";

// ============================================================================
// COLLABORATOR CONTRACTS
// ============================================================================

/// Card directory: resolves an external card number to the card owning a ledger
pub trait CardDirectory {
    fn resolve_card(&self, card_number: &str) -> Result<Option<CardId>>;
}

/// A unit of work over the backing store.
///
/// Writes made through `ledger()` are visible to later reads in the same
/// transaction. Nothing is visible outside until `commit`; dropping the
/// transaction without committing discards every staged change.
pub trait LedgerTransaction: CardDirectory {
    type Ledger<'t>: LedgerStore
    where
        Self: 't;

    /// Ledger handle for `card`, scoped to this transaction
    fn ledger(&mut self, card: CardId) -> Result<Self::Ledger<'_>>;

    fn record_event(&mut self, event: &Event) -> Result<()>;

    fn commit(self) -> Result<()>;
}

// ============================================================================
// BATCH SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemResult {
    pub card: CardId,
    pub correction: Correction,
    pub days_filled: usize,
    pub outcome: CorrectionOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub items: Vec<ItemResult>,
}

impl BatchSummary {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn days_filled(&self) -> usize {
        self.items.iter().map(|i| i.days_filled).sum()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.items
            .iter()
            .filter(|i| i.outcome.as_str() == kind)
            .count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} corrections: {} adjusted, {} inserted, {} unchanged, {} days gap-filled",
            self.len(),
            self.count("adjusted"),
            self.count("inserted"),
            self.count("unchanged"),
            self.days_filled()
        )
    }
}

// ============================================================================
// BATCH PROCESSOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BatchProcessor {
    gap_filler: GapFiller,
    corrector: BalanceCorrector,
}

impl BatchProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `corrections` in order as one all-or-nothing unit.
    ///
    /// On success every item has been applied and `tx` is committed. On error
    /// `tx` is dropped uncommitted, so no item of the batch takes effect.
    #[instrument(skip_all, fields(items = corrections.len()))]
    pub fn apply_batch<T: LedgerTransaction>(
        &self,
        mut tx: T,
        corrections: &[Correction],
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();

        for (index, correction) in corrections.iter().enumerate() {
            match self.apply_item(&mut tx, correction) {
                Ok(item) => summary.items.push(item),
                Err(err) => {
                    warn!(
                        index,
                        card_number = %correction.card_number,
                        error = %err,
                        "batch aborted, rolling back"
                    );
                    return Err(err);
                }
            }
        }

        tx.commit()?;
        info!("{}", summary.summary());

        Ok(summary)
    }

    fn apply_item<T: LedgerTransaction>(
        &self,
        tx: &mut T,
        correction: &Correction,
    ) -> Result<ItemResult> {
        let card = tx
            .resolve_card(&correction.card_number)?
            .ok_or_else(|| LedgerError::CardNotFound {
                card_number: correction.card_number.clone(),
            })?;

        let (report, outcome) = {
            let mut ledger = tx.ledger(card)?;
            let report = self.gap_filler.fill(&mut ledger)?;
            let outcome = self
                .corrector
                .apply(&mut ledger, correction.date, correction.amount)?;
            (report, outcome)
        };

        debug!(
            %card,
            date = %correction.date,
            outcome = outcome.as_str(),
            "correction applied"
        );

        if report.filled > 0 {
            tx.record_event(&Event::gaps_filled(
                &correction.card_number,
                &report,
                BATCH_ACTOR,
            ))?;
        }
        tx.record_event(&Event::correction_applied(correction, &outcome, BATCH_ACTOR))?;

        Ok(ItemResult {
            card,
            correction: correction.clone(),
            days_filled: report.filled,
            outcome,
        })
    }
}
