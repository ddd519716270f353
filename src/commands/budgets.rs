// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::{InterestRate, NewBudget};
use crate::service::Ledger;
use crate::utils::{
    fmt_money, fmt_rate, fmt_timestamp, maybe_print_json, parse_timestamp, pretty_table,
    rate_from_matches, required_arg,
};
use anyhow::{Context, Result};
use serde::Serialize;

pub fn handle(ledger: &mut Ledger, owner: &str, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => add(ledger, owner, sub)?,
        Some(("list", sub)) => list(ledger, owner, sub)?,
        Some(("show", sub)) => show(ledger, owner, sub)?,
        Some(("archive", sub)) => archive(ledger, owner, sub)?,
        Some(("set-rate", sub)) => set_rate(ledger, owner, sub)?,
        _ => {}
    }
    Ok(())
}

fn add(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let now = ledger.now();
    let rate = rate_from_matches(sub, now)?.unwrap_or_else(|| InterestRate::zero(now));
    let budget = ledger.create_budget(
        owner,
        NewBudget {
            name: required_arg(sub, "name")?.trim().to_string(),
            description: sub
                .get_one::<String>("description")
                .cloned()
                .unwrap_or_default(),
            default_interest_rate: rate,
        },
    )?;
    println!(
        "Created budget {} '{}' ({})",
        budget.id,
        budget.name,
        fmt_rate(&budget.default_interest_rate)
    );
    Ok(())
}

#[derive(Serialize)]
pub struct BudgetRow {
    pub id: i64,
    pub name: String,
    pub archived: bool,
    pub invested: String,
    pub available: String,
    pub currently_lent: String,
    pub earned_interest: String,
    pub live_loans: i64,
}

pub fn query_rows(ledger: &Ledger, owner: &str) -> Result<Vec<BudgetRow>> {
    Ok(ledger
        .list_budgets(owner)?
        .into_iter()
        .map(|b| BudgetRow {
            id: b.id,
            name: b.name,
            archived: b.is_archived,
            invested: fmt_money(&b.current_stats.invested),
            available: fmt_money(&b.current_stats.available),
            currently_lent: fmt_money(&b.current_stats.currently_lent),
            earned_interest: fmt_money(&b.current_stats.earned_interest),
            live_loans: b.current_stats.live_loan_count,
        })
        .collect())
}

fn list(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let data = query_rows(ledger, owner)?;
    if !maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &data)? {
        let rows = data
            .iter()
            .map(|r| {
                vec![
                    r.id.to_string(),
                    r.name.clone(),
                    if r.archived { "yes".into() } else { String::new() },
                    r.invested.clone(),
                    r.available.clone(),
                    r.currently_lent.clone(),
                    r.earned_interest.clone(),
                    r.live_loans.to_string(),
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &["ID", "Name", "Archived", "Invested", "Available", "Lent", "Interest", "Live loans"],
                rows
            )
        );
    }
    Ok(())
}

fn show(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("budget id missing")?;
    let view = ledger.recalculate_budget(owner, id)?;
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &view)? {
        return Ok(());
    }
    let s = &view.budget.current_stats;
    println!(
        "Budget {} '{}' ({}){}",
        view.budget.id,
        view.budget.name,
        fmt_rate(&view.budget.default_interest_rate),
        if view.budget.is_archived { " [archived]" } else { "" }
    );
    let figures = vec![
        vec!["Invested".into(), fmt_money(&s.invested)],
        vec!["Withdrawn".into(), fmt_money(&s.withdrawn)],
        vec!["Available".into(), fmt_money(&s.available)],
        vec!["Currently lent".into(), fmt_money(&s.currently_lent)],
        vec!["Total lent".into(), fmt_money(&s.total_lent)],
        vec!["Principal paid back".into(), fmt_money(&s.paid_back_principal)],
        vec!["Interest earned".into(), fmt_money(&s.earned_interest)],
        vec!["Fees earned".into(), fmt_money(&s.earned_fees)],
        vec![
            "Forgiven (p/i/f)".into(),
            format!(
                "{} / {} / {}",
                fmt_money(&s.forgiven_principal),
                fmt_money(&s.forgiven_interest),
                fmt_money(&s.forgiven_fees)
            ),
        ],
        vec!["Defaulted principal".into(), fmt_money(&s.defaulted_principal)],
        vec![
            "Loans (live/total)".into(),
            format!("{}/{}", s.live_loan_count, s.loan_count),
        ],
        vec!["Average loan size".into(), fmt_money(&s.average_loan_size)],
        vec![
            "Average duration (days)".into(),
            format!("{:.1}", s.average_loan_duration_days),
        ],
        vec![
            "Last transaction".into(),
            s.last_transaction_timestamp
                .map(fmt_timestamp)
                .unwrap_or_default(),
        ],
    ];
    println!("{}", pretty_table(&["Figure", "Value"], figures));
    Ok(())
}

fn archive(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("budget id missing")?;
    let budget = ledger.archive_budget(owner, id)?;
    println!("Archived budget {} '{}'", budget.id, budget.name);
    Ok(())
}

fn set_rate(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("budget id missing")?;
    let effective = match sub.get_one::<String>("effective") {
        Some(s) => parse_timestamp(s)?,
        None => ledger.now(),
    };
    let rate = rate_from_matches(sub, effective)?.context("--rate is required")?;
    let budget = ledger.set_budget_rate(owner, id, rate)?;
    println!(
        "Budget {} now lends at {}",
        budget.id,
        fmt_rate(&budget.default_interest_rate)
    );
    Ok(())
}
