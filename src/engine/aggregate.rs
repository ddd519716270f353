// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Budget statistics derived from the budget's own history plus the replays
//! of every loan it funded.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::arith;
use crate::engine::replay::LoanReplay;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{Address, BudgetStats, DAY_MS, Loan, LoanStatus, Transaction, TransactionKind};

/// A funded loan with its fresh replay.
pub struct LoanLink<'a> {
    pub loan: &'a Loan,
    pub replay: &'a LoanReplay,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancePoint {
    pub transaction_id: i64,
    pub timestamp: i64,
    pub delta: Decimal,
    pub available: Decimal,
}

/// Running available balance after every transaction, oldest first.
pub fn available_timeline(budget_id: i64, history: &[Transaction]) -> LedgerResult<Vec<BalancePoint>> {
    let address = Address::budget(budget_id);
    let mut ordered: Vec<&Transaction> = history.iter().filter(|t| t.touches(&address)).collect();
    ordered.sort_by(|a, b| Transaction::chronological(a, b));

    let mut available = Decimal::ZERO;
    let mut points = Vec::with_capacity(ordered.len());
    for t in ordered {
        let delta = if t.to == address {
            t.amount
        } else {
            arith::sub(Decimal::ZERO, t.amount)?
        };
        available = arith::add(available, delta)?;
        points.push(BalancePoint {
            transaction_id: t.id,
            timestamp: t.transaction_timestamp,
            delta,
            available,
        });
    }
    Ok(points)
}

pub fn aggregate(
    budget_id: i64,
    history: &[Transaction],
    loans: &[LoanLink<'_>],
) -> LedgerResult<BudgetStats> {
    let address = Address::budget(budget_id);
    let mut stats = BudgetStats::default();

    for t in history.iter().filter(|t| t.touches(&address)) {
        match t.kind()? {
            TransactionKind::Deposit => stats.invested = arith::add(stats.invested, t.amount)?,
            TransactionKind::Withdrawal => stats.withdrawn = arith::add(stats.withdrawn, t.amount)?,
            TransactionKind::Funding => {
                stats.total_lent = arith::add(stats.total_lent, t.amount)?;
                stats.currently_lent = arith::add(stats.currently_lent, t.amount)?;
            }
            TransactionKind::Payment => {
                stats.currently_lent = arith::sub(stats.currently_lent, t.amount)?;
            }
            other => {
                return Err(LedgerError::validation(format!(
                    "{} cannot move money in or out of a budget",
                    other.as_str()
                )));
            }
        }
        stats.last_transaction_timestamp = Some(
            stats
                .last_transaction_timestamp
                .map_or(t.transaction_timestamp, |ts| ts.max(t.transaction_timestamp)),
        );
    }
    stats.available = arith::sub(
        arith::sub(stats.invested, stats.withdrawn)?,
        stats.currently_lent,
    )?;

    let mut invested_in_loans = Decimal::ZERO;
    let mut duration_ms = Decimal::ZERO;
    for link in loans {
        let Some(share) = link.replay.share(budget_id) else {
            continue;
        };
        stats.loan_count += 1;
        if !link.loan.status.is_terminal() {
            stats.live_loan_count += 1;
        }
        if link.loan.status == LoanStatus::Defaulted {
            stats.defaulted_principal = arith::add(
                stats.defaulted_principal,
                arith::floor_zero(share.outstanding_principal),
            )?;
        }
        invested_in_loans = arith::add(invested_in_loans, share.invested)?;
        duration_ms = arith::add(
            duration_ms,
            Decimal::from(link.loan.closes_timestamp - link.loan.opened_timestamp),
        )?;
        stats.paid_back_principal = arith::add(stats.paid_back_principal, share.paid_principal)?;
        stats.earned_interest = arith::add(stats.earned_interest, share.paid_interest)?;
        stats.earned_fees = arith::add(stats.earned_fees, share.paid_fees)?;
        stats.forgiven_principal = arith::add(stats.forgiven_principal, share.forgiven_principal)?;
        stats.forgiven_interest = arith::add(stats.forgiven_interest, share.forgiven_interest)?;
        stats.forgiven_fees = arith::add(stats.forgiven_fees, share.forgiven_fees)?;
    }
    if stats.loan_count > 0 {
        let count = Decimal::from(stats.loan_count);
        stats.average_loan_size = arith::div(invested_in_loans, count)?;
        stats.average_loan_duration_days =
            arith::div(arith::div(duration_ms, count)?, Decimal::from(DAY_MS))?;
    }
    Ok(stats)
}
