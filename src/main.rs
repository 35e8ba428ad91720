use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use card_ledger::{
    load_balance_csv, parse_balance_date, CardDirectory, CardId, LedgerConfig, LedgerError,
    SqliteBook,
};

#[derive(Parser)]
#[command(name = "card-ledger", version, about = "Credit card balance-history ledger")]
struct Cli {
    /// JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides config and CARD_LEDGER_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the database schema
    Init,
    /// Register a credit card number
    AddCard {
        number: String,
        #[arg(long, default_value = "unknown")]
        bank: String,
    },
    /// Load balance history rows from CSV
    ImportHistory { csv: PathBuf },
    /// Apply a CSV batch of balance corrections (all or nothing)
    Apply { csv: PathBuf },
    /// Show the balance of a card on a date
    Balance {
        number: String,
        date: String,
        /// Fall back to the next recorded date when the day has no entry
        #[arg(long)]
        closest: bool,
    },
    /// Print a card's full balance history
    History {
        number: String,
        #[arg(long)]
        json: bool,
    },
    /// Print a card's audit trail
    Events { number: String },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let mut config = LedgerConfig::from_env(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.database_path = db;
    }

    let mut book = SqliteBook::open(&config)
        .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;

    match cli.command {
        Command::Init => {
            println!("✓ Database initialized at {}", config.database_path.display());
        }
        Command::AddCard { number, bank } => {
            let card = book.register_card(&number, &bank)?;
            println!("✓ Registered card {} (id {})", number, card);
        }
        Command::ImportHistory { csv } => {
            let rows = load_balance_csv(&csv)?;
            println!("📂 Loaded {} balance rows from {}", rows.len(), csv.display());
            let imported = book.import_history(&rows)?;
            println!("✓ Imported {} balance rows", imported);
        }
        Command::Apply { csv } => {
            let corrections = load_balance_csv(&csv)?;
            println!("📂 Loaded {} corrections from {}", corrections.len(), csv.display());
            let summary = book
                .apply_batch(&corrections)
                .context("Batch rolled back, no correction was applied")?;
            println!("✓ {}", summary.summary());
        }
        Command::Balance {
            number,
            date,
            closest,
        } => {
            let card = resolve(&book, &number)?;
            let date = parse_balance_date(&date)?;
            if closest {
                let entry = book.closest_entry(card, date)?;
                println!("{} {} {}", number, entry.date, entry.balance);
            } else {
                let balance = book.query_balance(card, date)?;
                println!("{} {} {}", number, date, balance);
            }
        }
        Command::History { number, json } => {
            let card = resolve(&book, &number)?;
            let history = book.history(card)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&history)?);
            } else {
                for entry in &history {
                    println!("{}  {:>14}", entry.date, entry.balance);
                }
                println!("{} days", history.len());
            }
        }
        Command::Events { number } => {
            for event in book.events_for_card(&number)? {
                println!(
                    "{}  {:<20} {:<16} {}",
                    event.timestamp.to_rfc3339(),
                    event.event_type,
                    event.actor,
                    event.data
                );
            }
        }
    }

    Ok(())
}

fn resolve(book: &SqliteBook, number: &str) -> Result<CardId> {
    let card = book
        .resolve_card(number)?
        .ok_or_else(|| LedgerError::CardNotFound {
            card_number: number.to_string(),
        })?;
    Ok(card)
}
