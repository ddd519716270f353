// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::engine::arith;
use crate::engine::interest::{self, ProjectedPayment};
use crate::models::PaymentFrequency;
use crate::utils::{
    fmt_money, fmt_timestamp, maybe_print_json, parse_decimal, parse_timestamp, pretty_table,
    rate_from_matches, required_arg,
};
use anyhow::{Context, Result};

/// Schedule for the `project` subcommand; reads nothing from the ledger.
pub fn schedule(sub: &clap::ArgMatches) -> Result<Vec<ProjectedPayment>> {
    let opened = parse_timestamp(required_arg(sub, "opened")?)?;
    let closes = parse_timestamp(required_arg(sub, "closes")?)?;
    let principal = parse_decimal(required_arg(sub, "principal")?)?;
    let frequency: PaymentFrequency = required_arg(sub, "frequency")?.parse()?;
    let rate = rate_from_matches(sub, opened)?.context("--rate is required")?;
    Ok(interest::project_amortization(
        opened, closes, &rate, principal, frequency,
    )?)
}

pub fn handle(sub: &clap::ArgMatches) -> Result<()> {
    let rows = schedule(sub)?;
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &rows)? {
        return Ok(());
    }
    let total_interest = arith::sum(rows.iter().map(|r| r.interest))?;
    let table = rows
        .iter()
        .map(|r| {
            vec![
                r.number.to_string(),
                fmt_timestamp(r.due_timestamp),
                fmt_money(&r.payment),
                fmt_money(&r.interest),
                fmt_money(&r.principal),
                fmt_money(&r.remaining_principal),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["#", "Due", "Payment", "Interest", "Principal", "Remaining"],
            table
        )
    );
    println!("Total interest: {}", fmt_money(&total_interest));
    Ok(())
}
