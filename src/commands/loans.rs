// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::models::{InterestRate, LoanStatus, NewLoan, PaymentFrequency};
use crate::service::{Ledger, LoanView};
use crate::utils::{
    fmt_money, fmt_rate, fmt_timestamp, maybe_print_json, parse_timestamp, pretty_table,
    rate_from_matches, required_arg,
};
use anyhow::{Context, Result, bail};
use serde::Serialize;

pub fn handle(ledger: &mut Ledger, owner: &str, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("add", sub)) => add(ledger, owner, sub)?,
        Some(("list", sub)) => list(ledger, owner, sub)?,
        Some(("show", sub)) => show(ledger, owner, sub)?,
        Some(("status", sub)) => status(ledger, owner, sub)?,
        Some(("set-rate", sub)) => set_rate(ledger, owner, sub)?,
        _ => {}
    }
    Ok(())
}

fn add(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let opened = parse_timestamp(required_arg(sub, "opened")?)?;
    let closes = parse_timestamp(required_arg(sub, "closes")?)?;
    let frequency: PaymentFrequency = required_arg(sub, "frequency")?.parse()?;
    let rate = rate_from_matches(sub, opened)?.unwrap_or_else(|| InterestRate::zero(opened));
    let loan = ledger.create_loan(
        owner,
        NewLoan {
            name: required_arg(sub, "name")?.trim().to_string(),
            customer_id: sub
                .get_one::<String>("customer")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            opened_timestamp: opened,
            closes_timestamp: closes,
            payment_frequency: frequency,
            notes: sub.get_one::<String>("notes").cloned().unwrap_or_default(),
            interest_rate: rate,
        },
    )?;
    println!(
        "Created loan {} '{}' {} -> {} at {}",
        loan.id,
        loan.name,
        fmt_timestamp(loan.opened_timestamp),
        fmt_timestamp(loan.closes_timestamp),
        fmt_rate(&loan.interest_rate)
    );
    Ok(())
}

#[derive(Serialize)]
pub struct LoanRow {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub invested: String,
    pub outstanding_principal: String,
    pub outstanding_interest: String,
    pub outstanding_fees: String,
    pub closes: String,
}

pub fn query_rows(ledger: &Ledger, owner: &str) -> Result<Vec<LoanRow>> {
    Ok(ledger
        .list_loans(owner)?
        .into_iter()
        .map(|l| LoanRow {
            id: l.id,
            name: l.name,
            status: l.status.as_str().to_string(),
            invested: fmt_money(&l.summary.invested),
            outstanding_principal: fmt_money(&l.summary.outstanding_principal),
            outstanding_interest: fmt_money(&l.summary.outstanding_interest),
            outstanding_fees: fmt_money(&l.summary.outstanding_fees),
            closes: fmt_timestamp(l.closes_timestamp),
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
                    r.status.clone(),
                    r.invested.clone(),
                    r.outstanding_principal.clone(),
                    r.outstanding_interest.clone(),
                    r.outstanding_fees.clone(),
                    r.closes.clone(),
                ]
            })
            .collect();
        println!(
            "{}",
            pretty_table(
                &["ID", "Name", "Status", "Invested", "Principal", "Interest", "Fees", "Closes"],
                rows
            )
        );
    }
    Ok(())
}

fn show(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("loan id missing")?;
    let view = ledger.recalculate_loan(owner, id)?;
    if maybe_print_json(sub.get_flag("json"), sub.get_flag("jsonl"), &view)? {
        return Ok(());
    }
    print_summary(&view);
    if sub.get_flag("intervals") {
        print_intervals(&view);
    }
    Ok(())
}

fn print_summary(view: &LoanView) {
    let loan = &view.loan;
    let s = &loan.summary;
    println!(
        "Loan {} '{}' [{}] {} ({} payments)",
        loan.id,
        loan.name,
        loan.status.as_str(),
        fmt_rate(&loan.interest_rate),
        loan.payment_frequency.as_str().to_lowercase()
    );
    println!(
        "{}",
        pretty_table(
            &["", "Outstanding", "Paid", "Forgiven"],
            vec![
                vec![
                    "Principal".into(),
                    fmt_money(&s.outstanding_principal),
                    fmt_money(&s.paid_principal),
                    fmt_money(&s.forgiven_principal),
                ],
                vec![
                    "Interest".into(),
                    fmt_money(&s.outstanding_interest),
                    fmt_money(&s.paid_interest),
                    fmt_money(&s.forgiven_interest),
                ],
                vec![
                    "Fees".into(),
                    fmt_money(&s.outstanding_fees),
                    fmt_money(&s.paid_fees),
                    fmt_money(&s.forgiven_fees),
                ],
            ],
        )
    );
    let shares = view
        .shares
        .iter()
        .map(|b| {
            vec![
                b.budget_id.to_string(),
                fmt_money(&b.invested),
                fmt_money(&b.outstanding_principal),
                fmt_money(&b.paid_interest),
                b.rate.as_ref().map(fmt_rate).unwrap_or_default(),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Budget", "Invested", "Principal", "Interest paid", "Rate"],
            shares
        )
    );
}

fn print_intervals(view: &LoanView) {
    let rows = view
        .intervals
        .iter()
        .map(|i| {
            vec![
                i.transaction_id.map(|id| id.to_string()).unwrap_or_default(),
                fmt_timestamp(i.timestamp),
                i.kind.as_str().to_string(),
                fmt_money(&i.amount),
                fmt_money(&i.interest_accrued),
                fmt_money(&i.totals.outstanding_principal),
                fmt_money(&i.totals.outstanding_interest),
                fmt_money(&i.totals.outstanding_fees),
            ]
        })
        .collect();
    println!(
        "{}",
        pretty_table(
            &["Tx", "When", "Kind", "Amount", "Accrued", "Principal", "Interest", "Fees"],
            rows
        )
    );
}

fn status(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("loan id missing")?;
    let target: LoanStatus = required_arg(sub, "status")?.parse()?;
    if target == LoanStatus::Paid {
        bail!("PAID is set automatically once the loan is paid off");
    }
    let loan = ledger.change_loan_status(owner, id, target)?;
    println!("Loan {} is now {}", loan.id, loan.status.as_str());
    Ok(())
}

fn set_rate(ledger: &mut Ledger, owner: &str, sub: &clap::ArgMatches) -> Result<()> {
    let id = *sub.get_one::<i64>("id").context("loan id missing")?;
    let effective = match sub.get_one::<String>("effective") {
        Some(s) => parse_timestamp(s)?,
        None => ledger.now(),
    };
    let rate = rate_from_matches(sub, effective)?.context("--rate is required")?;
    let loan = ledger.set_loan_rate(owner, id, rate)?;
    println!(
        "Loan {} accrues at {} from {}",
        loan.id,
        fmt_rate(&loan.interest_rate),
        fmt_timestamp(loan.interest_rate.entry_timestamp)
    );
    Ok(())
}
