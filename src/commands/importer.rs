// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::{Address, NewTransaction};
use crate::service::Ledger;
use crate::utils::{parse_decimal, parse_timestamp, required_arg};
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::path::Path;

pub fn handle(ledger: &mut Ledger, owner: &str, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("transactions", sub)) => {
            let path = required_arg(sub, "path")?.trim();
            let count = import_transactions(ledger, owner, Path::new(path))?;
            println!("Imported {} transactions", count);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Reads `date,from,to,amount,description` rows (header required) and records
/// them as one batch. Any bad row aborts the import with nothing written.
pub fn import_transactions(ledger: &mut Ledger, owner: &str, path: &Path) -> Result<usize> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Open CSV {}", path.display()))?;

    let mut batch = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let line = idx + 2;
        let rec = result.with_context(|| format!("Read CSV line {}", line))?;
        let date_raw = rec.get(0).context("date missing")?;
        let from_raw = rec.get(1).context("from missing")?;
        let to_raw = rec.get(2).context("to missing")?;
        let amount_raw = rec.get(3).context("amount missing")?;
        let description = rec.get(4).unwrap_or("").to_string();

        let when = parse_timestamp(date_raw)
            .with_context(|| format!("Line {}: invalid date '{}'", line, date_raw))?;
        let from: Address = from_raw
            .parse()
            .with_context(|| format!("Line {}: invalid from '{}'", line, from_raw))?;
        let to: Address = to_raw
            .parse()
            .with_context(|| format!("Line {}: invalid to '{}'", line, to_raw))?;
        let amount = parse_decimal(amount_raw)
            .with_context(|| format!("Line {}: invalid amount '{}'", line, amount_raw))?;

        batch.push(NewTransaction {
            transaction_timestamp: when,
            description,
            amount,
            from,
            to,
            interest_rate: None,
        });
    }

    let stored = ledger
        .import_transactions(owner, batch)
        .with_context(|| format!("Import of {} rolled back", path.display()))?;
    Ok(stored.len())
}
