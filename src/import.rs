// CSV loaders for balance-history seeds and correction batches.
//
// Both files share one layout:
//   card_number,balance_date,balance_amount
//   4111-0000,2023-04-10,100.00

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

use crate::model::Correction;

#[derive(Debug, Deserialize)]
struct BalanceRecord {
    card_number: String,
    balance_date: String,
    balance_amount: String,
}

/// Parse balance rows from any CSV source, keeping file order
pub fn read_balance_rows<R: Read>(reader: R) -> Result<Vec<Correction>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    let mut rows = Vec::new();
    for (index, result) in rdr.deserialize().enumerate() {
        // header is line 1
        let line = index + 2;
        let record: BalanceRecord =
            result.with_context(|| format!("Failed to deserialize balance row at line {}", line))?;
        let row = Correction::parse(
            &record.card_number,
            &record.balance_date,
            &record.balance_amount,
        )
        .with_context(|| format!("Invalid balance row at line {}", line))?;
        rows.push(row);
    }

    Ok(rows)
}

pub fn load_balance_csv(csv_path: &Path) -> Result<Vec<Correction>> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("Failed to open CSV file {}", csv_path.display()))?;
    read_balance_rows(file)
}
