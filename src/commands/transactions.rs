// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::{Address, NewTransaction, Transaction, TransactionEdit};
use crate::service::Ledger;
use crate::store::Page;
use crate::utils::{
    fmt_money, fmt_timestamp, maybe_print_json, parse_decimal, parse_timestamp, pretty_table,
    required_arg,
};
use anyhow::{Context, Result, bail};
use serde::Serialize;

pub fn handle(ledger: &mut Ledger, owner: &str, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => add(ledger, owner, sub)?,
        Some(("edit", sub)) => edit(ledger, owner, sub)?,
        Some(("list", sub)) => list(ledger, owner, sub)?,
        Some(("history", sub)) => history(ledger, owner, sub)?,
        _ => {}
    }
    Ok(())
}

fn add(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let from: Address = required_arg(sub, "from")?.parse()?;
    let to: Address = required_arg(sub, "to")?.parse()?;
    let amount = parse_decimal(required_arg(sub, "amount")?)?;
    let when = parse_timestamp(required_arg(sub, "date")?)?;
    let stored = ledger.propose_transaction(
        owner,
        NewTransaction {
            transaction_timestamp: when,
            description: sub
                .get_one::<String>("description")
                .cloned()
                .unwrap_or_default(),
            amount,
            from,
            to,
            interest_rate: None,
        },
    )?;
    println!(
        "Recorded {} {} {} -> {} on {} (id {})",
        stored.kind()?.as_str(),
        fmt_money(&stored.amount),
        stored.from,
        stored.to,
        fmt_timestamp(stored.transaction_timestamp),
        stored.id
    );
    Ok(())
}

fn edit(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("transaction id missing")?;
    let edit = TransactionEdit {
        transaction_timestamp: sub
            .get_one::<String>("date")
            .map(|s| parse_timestamp(s))
            .transpose()?,
        description: sub.get_one::<String>("description").cloned(),
        amount: sub
            .get_one::<String>("amount")
            .map(|s| parse_decimal(s))
            .transpose()?,
    };
    if edit == TransactionEdit::default() {
        bail!("Nothing to edit: pass --date, --amount or --description");
    }
    let stored = ledger.edit_transaction(owner, id, edit)?;
    println!(
        "Transaction {} is now version {}: {} on {}",
        stored.id,
        stored.version,
        fmt_money(&stored.amount),
        fmt_timestamp(stored.transaction_timestamp)
    );
    Ok(())
}

#[derive(Serialize)]
pub struct TransactionRow {
    pub id: i64,
    pub date: String,
    pub kind: String,
    pub from: String,
    pub to: String,
    pub amount: String,
    pub description: String,
    pub version: i64,
}

impl TransactionRow {
    fn from_transaction(t: &Transaction) -> Self {
        Self {
            id: t.id,
            date: fmt_timestamp(t.transaction_timestamp),
            kind: t
                .kind()
                .map(|k| k.as_str().to_string())
                .unwrap_or_else(|_| "?".into()),
            from: t.from.to_string(),
            to: t.to.to_string(),
            amount: fmt_money(&t.amount),
            description: t.description.clone(),
            version: t.version,
        }
    }
}

/// Newest first, optionally narrowed to one budget or loan.
pub fn query_rows(
    ledger: &Ledger,
    owner: &str,
    sub: &clap::ArgMatches,
) -> Result<Vec<TransactionRow>> {
    let address = match (sub.get_one::<i64>("budget"), sub.get_one::<i64>("loan")) {
        (Some(b), _) => Some(Address::budget(*b)),
        (None, Some(l)) => Some(Address::loan(*l)),
        (None, None) => None,
    };
    let page = match sub.get_one::<usize>("limit") {
        Some(n) => Page::first(*n),
        None => Page::ALL,
    };
    Ok(ledger
        .list_transactions(owner, address.as_ref(), page)?
        .iter()
        .map(TransactionRow::from_transaction)
        .collect())
}

fn list(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let data = query_rows(ledger, owner, sub)?;
    if !maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &data)? {
        let rows: Vec<Vec<String>> = data
            .iter()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.date.clone(),
                    r.kind.clone(),
                    r.from.clone(),
                    r.to.clone(),
                    r.amount.clone(),
                    r.description.clone(),
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &["ID", "Date", "Kind", "From", "To", "Amount", "Description"],
                rows,
            )
        );
    }
    Ok(())
}

fn history(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("transaction id missing")?;
    let current = ledger.get_transaction(owner, id)?;
    let versions = ledger.transaction_history(owner, id)?;
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &versions)? {
        return Ok(());
    }
    let mut rows: Vec<Vec<String>> = versions
        .iter()
        .map(|v| {
            vec![
                v.version.to_string(),
                fmt_timestamp(v.archived_at),
                fmt_timestamp(v.snapshot.transaction_timestamp),
                fmt_money(&v.snapshot.amount),
                v.snapshot.description.clone(),
            ]
        })
        .collect();
    rows.push(vec![
        format!("{} (current)", current.version),
        String::new(),
        fmt_timestamp(current.transaction_timestamp),
        fmt_money(&current.amount),
        current.description.clone(),
    ]);
    println!(
        "{}",
        pretty_table(&["Version", "Replaced", "Date", "Amount", "Description"], rows)
    );
    Ok(())
}
