// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Rebuilds a loan's state from its transaction history.
//!
//! Balances are never stored incrementally. Each call walks the history from
//! the oldest transaction forward, accruing interest in whole hours between
//! transactions and attributing every movement to the funding budgets. The
//! same history and horizon always produce the same result.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::allocation::{Allocation, Book, BudgetShare, Bucket, Totals};
use crate::engine::arith;
use crate::engine::interest::{self, RateSchedule};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    HOUR_MS, InterestRate, LoanSummary, RateType, RelatedBudget, Transaction, TransactionKind,
};

/// Loan state right after one transaction was applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntervalSnapshot {
    /// `None` for entries injected by the replay itself.
    pub transaction_id: Option<i64>,
    pub kind: TransactionKind,
    pub timestamp: i64,
    pub entry_timestamp: i64,
    pub amount: Decimal,
    /// Interest accrued between the previous transaction and this one.
    pub interest_accrued: Decimal,
    pub principal_effect: Decimal,
    pub interest_effect: Decimal,
    pub fee_effect: Decimal,
    pub totals: Totals,
    /// Lowest outstanding principal across the budget shares.
    pub lowest_share_principal: Decimal,
    pub allocations: Vec<Allocation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanReplay {
    pub loan_id: i64,
    /// Newest first.
    pub intervals: Vec<IntervalSnapshot>,
    pub summary: LoanSummary,
    pub shares: Vec<BudgetShare>,
}

impl LoanReplay {
    pub fn share(&self, budget_id: i64) -> Option<&BudgetShare> {
        self.shares.iter().find(|s| s.budget_id == budget_id)
    }

    /// Oldest interval where any share's outstanding principal rounds below zero.
    pub fn first_overpayment(&self) -> Option<&IntervalSnapshot> {
        self.intervals
            .iter()
            .rev()
            .find(|i| arith::round2(i.lowest_share_principal) < Decimal::ZERO)
    }
}

struct Step {
    transaction_id: Option<i64>,
    kind: TransactionKind,
    timestamp: i64,
    entry_timestamp: i64,
    amount: Decimal,
    /// Funding budget, or the budget a synthetic entry is aimed at.
    budget: Option<i64>,
    snapshot: Option<InterestRate>,
}

/// Replays `history` (any order) for `loan_id` with interest accrued up to
/// `timestamp_limit` when the loan carries a periodic rate.
pub fn replay(
    loan_id: i64,
    rates: &RateSchedule,
    history: &[Transaction],
    timestamp_limit: i64,
) -> LedgerResult<LoanReplay> {
    let mut ordered: Vec<&Transaction> = history
        .iter()
        .filter(|t| t.loan_id() == Some(loan_id))
        .collect();
    ordered.sort_by(|a, b| Transaction::chronological(a, b));
    log::debug!(
        "replaying loan {} over {} transactions up to {}",
        loan_id,
        ordered.len(),
        timestamp_limit
    );

    let steps = plan(&ordered, rates, timestamp_limit)?;
    let mut book = Book::default();
    let mut accrued_until: Option<i64> = None;
    let mut intervals = Vec::with_capacity(steps.len());

    for step in steps {
        let mut interest_accrued = Decimal::ZERO;
        if let Some(since) = accrued_until {
            let hours = (step.timestamp - since).max(0) / HOUR_MS;
            if hours > 0 {
                interest_accrued = accrue_gap(&mut book, rates, since, hours)?;
                accrued_until = Some(since + hours * HOUR_MS);
            }
        }

        let at = step.timestamp;
        let allocations = match step.kind {
            TransactionKind::Funding => {
                let budget = step
                    .budget
                    .ok_or_else(|| LedgerError::validation("funding without a budget"))?;
                let allocations = book.fund(budget, step.amount, at, step.snapshot.as_ref())?;
                if accrued_until.is_none() {
                    accrued_until = Some(at);
                }
                allocations
            }
            TransactionKind::Payment => book.pay(step.amount, step.budget, at)?,
            TransactionKind::ManualInterest => {
                book.charge(step.amount, Bucket::Interest, step.budget, at)?
            }
            TransactionKind::ManualFee => book.charge(step.amount, Bucket::Fees, step.budget, at)?,
            TransactionKind::Forgiveness => book.forgive(step.amount, step.budget, at)?,
            TransactionKind::Refund => book.refund(step.amount, step.budget, at)?,
            TransactionKind::Mark => Vec::new(),
            TransactionKind::Deposit | TransactionKind::Withdrawal => {
                return Err(LedgerError::validation(format!(
                    "{} cannot appear in a loan history",
                    step.kind.as_str()
                )));
            }
        };
        book.snap();
        let lowest_share_principal = book
            .shares()
            .map(|s| s.outstanding_principal)
            .min()
            .unwrap_or_default();

        intervals.push(IntervalSnapshot {
            transaction_id: step.transaction_id,
            kind: step.kind,
            timestamp: step.timestamp,
            entry_timestamp: step.entry_timestamp,
            amount: step.amount,
            interest_accrued,
            principal_effect: arith::sum(allocations.iter().map(|a| a.principal))?,
            interest_effect: arith::sum(allocations.iter().map(|a| a.interest))?,
            fee_effect: arith::sum(allocations.iter().map(|a| a.fees))?,
            totals: book.totals()?,
            lowest_share_principal,
            allocations,
        });
    }

    let totals = book.totals()?;
    let shares = book.into_shares();
    let mut related = std::collections::BTreeMap::new();
    for share in &shares {
        related.insert(
            share.budget_id,
            RelatedBudget {
                invested: share.invested,
                withdrawn: share.withdrawn()?,
            },
        );
    }
    let summary = LoanSummary {
        invested: totals.invested,
        outstanding_principal: totals.outstanding_principal,
        paid_principal: totals.paid_principal,
        outstanding_interest: totals.outstanding_interest,
        paid_interest: totals.paid_interest,
        outstanding_fees: totals.outstanding_fees,
        paid_fees: totals.paid_fees,
        forgiven_principal: totals.forgiven_principal,
        forgiven_interest: totals.forgiven_interest,
        forgiven_fees: totals.forgiven_fees,
        last_transaction_timestamp: ordered.last().map(|t| t.transaction_timestamp),
        calculated_related_budgets: related,
    };

    intervals.reverse();
    Ok(LoanReplay {
        loan_id,
        intervals,
        summary,
        shares,
    })
}

/// Turns the ordered history into replay steps, injecting one-time interest
/// for full-duration rates and a trailing mark whenever anything accrues by the hour.
fn plan(ordered: &[&Transaction], rates: &RateSchedule, limit: i64) -> LedgerResult<Vec<Step>> {
    let mut steps = Vec::with_capacity(ordered.len() + 2);
    let mut funded = false;
    let mut periodic = rates.has_periodic();

    for t in ordered {
        let kind = t.kind()?;
        let budget = match kind {
            TransactionKind::Funding => t.from.budget_id(),
            TransactionKind::Payment => t.to.budget_id(),
            TransactionKind::ManualInterest | TransactionKind::ManualFee | TransactionKind::Refund => {
                t.from.id
            }
            TransactionKind::Forgiveness => t.to.id,
            _ => None,
        };
        steps.push(Step {
            transaction_id: Some(t.id),
            kind,
            timestamp: t.transaction_timestamp,
            entry_timestamp: t.entry_timestamp,
            amount: t.amount,
            budget,
            snapshot: t.interest_rate.clone(),
        });
        if kind != TransactionKind::Funding {
            continue;
        }
        if t.interest_rate.as_ref().is_some_and(InterestRate::governs_share) {
            periodic = true;
        }

        let in_effect = rates.at(t.transaction_timestamp);
        let full_percentage = |r: &InterestRate| {
            r.is_full_duration() && r.rate_type == RateType::PercentagePerDuration
        };
        let one_time = if !funded
            && in_effect.is_full_duration()
            && in_effect.rate_type == RateType::FixedPerDuration
        {
            Some((interest::one_time_interest(in_effect, t.amount)?, None))
        } else {
            let rate = t
                .interest_rate
                .as_ref()
                .filter(|r| full_percentage(r) && !r.amount.is_zero())
                .or_else(|| full_percentage(in_effect).then_some(in_effect));
            match rate {
                Some(r) => Some((interest::one_time_interest(r, t.amount)?, budget)),
                None => None,
            }
        };
        funded = true;

        if let Some((amount, target)) = one_time.filter(|(amount, _)| *amount > Decimal::ZERO) {
            steps.push(Step {
                transaction_id: None,
                kind: TransactionKind::ManualInterest,
                timestamp: t.transaction_timestamp,
                entry_timestamp: t.entry_timestamp,
                amount,
                budget: target,
                snapshot: None,
            });
        }
    }

    if periodic {
        let last = steps.last().map(|s| (s.timestamp, s.entry_timestamp));
        let (timestamp, entry_timestamp) = match last {
            Some((ts, entry)) if ts >= limit => (ts, entry),
            _ => (limit, limit),
        };
        steps.push(Step {
            transaction_id: None,
            kind: TransactionKind::Mark,
            timestamp,
            entry_timestamp,
            amount: Decimal::ZERO,
            budget: None,
            snapshot: None,
        });
    }
    Ok(steps)
}

/// Accrues `hours` whole hours from `since`, switching rates at their effective times.
fn accrue_gap(
    book: &mut Book,
    rates: &RateSchedule,
    since: i64,
    hours: i64,
) -> LedgerResult<Decimal> {
    let mut total = Decimal::ZERO;
    for (rate, span) in rates.hours_by_rate(since, hours) {
        total = arith::add(total, book.accrue(rate, span)?)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Address, AddressKind, DAY_MS, RateDuration};
    use std::str::FromStr;

    const T0: i64 = 1_735_689_600_000;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn rate(rate_type: RateType, duration: RateDuration, amount: &str, compounding: bool) -> InterestRate {
        InterestRate {
            rate_type,
            duration,
            amount: d(amount),
            is_compounding: compounding,
            entry_timestamp: T0,
        }
    }

    fn monthly_simple(pct: &str) -> RateSchedule {
        RateSchedule::single(rate(
            RateType::PercentagePerDuration,
            RateDuration::Month,
            pct,
            false,
        ))
    }

    fn tx(id: i64, ts: i64, amount: &str, from: Address, to: Address) -> Transaction {
        Transaction {
            id,
            owner: "local".into(),
            transaction_timestamp: ts,
            entry_timestamp: ts,
            description: String::new(),
            amount: d(amount),
            from,
            to,
            interest_rate: None,
            version: 1,
        }
    }

    fn fund(id: i64, ts: i64, amount: &str, budget: i64) -> Transaction {
        tx(id, ts, amount, Address::budget(budget), Address::loan(1))
    }

    fn pay(id: i64, ts: i64, amount: &str) -> Transaction {
        tx(id, ts, amount, Address::loan(1), Address::budget(1))
    }

    #[test]
    fn simple_monthly_interest_is_paid_before_principal() {
        let history = vec![fund(1, T0, "100", 1), pay(2, T0 + 30 * DAY_MS, "50")];
        let out = replay(1, &monthly_simple("10"), &history, T0 + 30 * DAY_MS).unwrap();
        assert_eq!(arith::round2(out.summary.paid_interest), d("10.00"));
        assert_eq!(arith::round2(out.summary.outstanding_principal), d("60.00"));
        assert_eq!(arith::round2(out.summary.paid_principal), d("40.00"));
        assert_eq!(out.intervals[0].kind, TransactionKind::Mark);
        assert_eq!(out.intervals.last().unwrap().transaction_id, Some(1));
    }

    #[test]
    fn replay_is_idempotent_and_order_independent() {
        let history = vec![
            pay(3, T0 + 40 * DAY_MS, "20"),
            fund(1, T0, "500", 1),
            fund(2, T0 + 5 * DAY_MS, "250", 2),
        ];
        let mut reversed = history.clone();
        reversed.reverse();
        let limit = T0 + 90 * DAY_MS;
        let a = replay(1, &monthly_simple("3"), &history, limit).unwrap();
        let b = replay(1, &monthly_simple("3"), &reversed, limit).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn totals_conserve_invested_principal() {
        let history = vec![
            fund(1, T0, "600", 1),
            fund(2, T0, "400", 2),
            pay(3, T0 + 10 * DAY_MS, "300"),
            tx(4, T0 + 20 * DAY_MS, "50", Address::loan(1), Address::synthetic(AddressKind::Forgiveness, None)),
        ];
        let out = replay(1, &monthly_simple("1"), &history, T0 + 60 * DAY_MS).unwrap();
        for interval in &out.intervals {
            let t = &interval.totals;
            let accounted = arith::sum([t.paid_principal, t.outstanding_principal, t.forgiven_principal]).unwrap();
            assert_eq!(arith::round2(accounted), arith::round2(t.invested));
        }
        for share in &out.shares {
            let accounted = arith::sum([
                share.paid_principal,
                share.outstanding_principal,
                share.forgiven_principal,
            ])
            .unwrap();
            assert_eq!(arith::round2(accounted), arith::round2(share.invested));
        }
    }

    #[test]
    fn two_budgets_split_principal_sixty_forty() {
        let history = vec![
            fund(1, T0, "600", 1),
            fund(2, T0, "400", 2),
            tx(3, T0 + HOUR_MS / 2, "400", Address::loan(1), Address::outside()),
        ];
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        let out = replay(1, &schedule, &history, T0 + DAY_MS).unwrap();
        assert_eq!(out.share(1).unwrap().outstanding_principal, d("360"));
        assert_eq!(out.share(2).unwrap().outstanding_principal, d("240"));
        assert_eq!(out.summary.calculated_related_budgets[&1].withdrawn, d("240"));
    }

    #[test]
    fn payment_to_a_budget_settles_that_budget_first() {
        let history = vec![
            fund(1, T0, "600", 1),
            fund(2, T0, "400", 2),
            pay(3, T0 + DAY_MS, "100"),
        ];
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        let out = replay(1, &schedule, &history, T0 + DAY_MS).unwrap();
        let first = out.share(1).unwrap();
        assert_eq!(first.paid_principal, d("100"));
        assert_eq!(first.outstanding_principal, d("500"));
        let second = out.share(2).unwrap();
        assert_eq!(second.withdrawn().unwrap(), Decimal::ZERO);
        assert_eq!(second.outstanding_principal, d("400"));
        let payment = out.intervals.iter().find(|i| i.transaction_id == Some(3)).unwrap();
        assert_eq!(payment.allocations.len(), 1);
    }

    #[test]
    fn overpaying_one_budget_is_reported_while_the_loan_still_owes() {
        let history = vec![
            fund(1, T0, "100", 1),
            fund(2, T0, "100", 2),
            pay(3, T0 + DAY_MS, "150"),
        ];
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        let out = replay(1, &schedule, &history, T0 + DAY_MS).unwrap();
        assert_eq!(out.summary.outstanding_principal, d("50"));
        assert_eq!(out.first_overpayment().unwrap().transaction_id, Some(3));
    }

    #[test]
    fn mark_position_does_not_change_later_balances() {
        let schedule = monthly_simple("5");
        let history = vec![fund(1, T0, "1000", 1), pay(2, T0 + 45 * DAY_MS + 1_800_000, "10")];
        let early = replay(1, &schedule, &history, T0 + 3 * DAY_MS).unwrap();
        let late = replay(1, &schedule, &history, T0 + 45 * DAY_MS + 1_800_000).unwrap();
        assert_eq!(early.summary, late.summary);
    }

    #[test]
    fn full_duration_fixed_interest_is_charged_once() {
        let schedule = RateSchedule::single(rate(
            RateType::FixedPerDuration,
            RateDuration::FullDuration,
            "25",
            false,
        ));
        let history = vec![fund(1, T0, "100", 1), fund(2, T0 + DAY_MS, "100", 2)];
        let out = replay(1, &schedule, &history, T0 + 400 * DAY_MS).unwrap();
        assert_eq!(out.summary.outstanding_interest, d("25"));
        assert!(out.intervals.iter().all(|i| i.kind != TransactionKind::Mark));
    }

    #[test]
    fn full_duration_percentage_is_charged_per_funding() {
        let schedule = RateSchedule::single(rate(
            RateType::PercentagePerDuration,
            RateDuration::FullDuration,
            "10",
            false,
        ));
        let history = vec![fund(1, T0, "100", 1), fund(2, T0 + DAY_MS, "300", 2)];
        let out = replay(1, &schedule, &history, T0 + 400 * DAY_MS).unwrap();
        assert_eq!(out.share(1).unwrap().outstanding_interest, d("10"));
        assert_eq!(out.share(2).unwrap().outstanding_interest, d("30"));
    }

    #[test]
    fn budget_snapshot_rate_overrides_loan_rate() {
        let mut funding = fund(1, T0, "100", 1);
        funding.interest_rate = Some(rate(
            RateType::PercentagePerDuration,
            RateDuration::Month,
            "10",
            false,
        ));
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        let history = vec![funding, fund(2, T0, "100", 2)];
        let out = replay(1, &schedule, &history, T0 + 30 * DAY_MS).unwrap();
        assert_eq!(arith::round2(out.share(1).unwrap().outstanding_interest), d("10.00"));
        assert_eq!(out.share(2).unwrap().outstanding_interest, Decimal::ZERO);
    }

    fn snapshot_funding(loan_rate: InterestRate) -> LoanReplay {
        let mut funding = fund(1, T0, "100", 1);
        funding.interest_rate = Some(rate(
            RateType::PercentagePerDuration,
            RateDuration::Month,
            "10",
            false,
        ));
        let schedule = RateSchedule::single(loan_rate);
        replay(1, &schedule, &[funding], T0 + 30 * DAY_MS).unwrap()
    }

    #[test]
    fn budget_snapshot_rate_applies_under_fixed_periodic_loan_rate() {
        let out = snapshot_funding(rate(RateType::FixedPerDuration, RateDuration::Day, "0", false));
        assert_eq!(arith::round2(out.share(1).unwrap().outstanding_interest), d("10.00"));
        assert_eq!(out.intervals[0].kind, TransactionKind::Mark);

        let out = snapshot_funding(rate(RateType::FixedPerDuration, RateDuration::Day, "1", false));
        assert_eq!(arith::round2(out.share(1).unwrap().outstanding_interest), d("10.00"));
    }

    #[test]
    fn budget_snapshot_rate_applies_under_full_duration_loan_rate() {
        let out = snapshot_funding(rate(
            RateType::FixedPerDuration,
            RateDuration::FullDuration,
            "0",
            false,
        ));
        assert_eq!(arith::round2(out.share(1).unwrap().outstanding_interest), d("10.00"));
        assert_eq!(out.intervals[0].kind, TransactionKind::Mark);
        assert_eq!(arith::round2(out.intervals[0].interest_accrued), d("10.00"));
    }

    #[test]
    fn overpayment_is_reported() {
        let history = vec![fund(1, T0, "100", 1), pay(2, T0, "150")];
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        let out = replay(1, &schedule, &history, T0).unwrap();
        let bad = out.first_overpayment().unwrap();
        assert_eq!(bad.transaction_id, Some(2));
    }

    #[test]
    fn payment_before_funding_is_rejected() {
        let history = vec![pay(1, T0, "10"), fund(2, T0 + DAY_MS, "100", 1)];
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        assert!(replay(1, &schedule, &history, T0 + DAY_MS).is_err());
    }
}
