// Card Ledger - balance-history engine for credit cards
// Exposes all modules for use in the CLI and tests

pub mod batch;
pub mod config;
pub mod corrector;
pub mod db;
pub mod error;
pub mod events;
pub mod gap_fill;
pub mod import;
pub mod memory;
pub mod model;
pub mod store;

// Re-export commonly used types
pub use batch::{
    BatchProcessor, BatchSummary, CardDirectory, ItemResult, LedgerTransaction,
};
pub use config::LedgerConfig;
pub use corrector::{BalanceCorrector, CorrectionOutcome};
pub use db::{setup_database, SqliteBook, SqliteLedger, SqliteTransaction};
pub use error::{ErrorKind, LedgerError, Result};
pub use events::Event;
pub use gap_fill::{GapFillReport, GapFiller};
pub use import::{load_balance_csv, read_balance_rows};
pub use memory::{MemoryBook, MemoryTransaction};
pub use model::{parse_amount, parse_balance_date, BalanceEntry, CardId, Correction};
pub use store::{closest_entry, query_balance, LedgerStore, MemoryLedger};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
