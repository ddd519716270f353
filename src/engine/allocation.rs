// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Attribution of loan movements to the budgets that funded the loan.
//!
//! A [`Book`] holds one [`BudgetShare`] per contributing budget. Consolidated
//! loan figures are always the sum of the shares, so the per-budget breakdown
//! and the loan totals cannot drift apart.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::engine::{arith, interest};
use crate::error::{LedgerError, LedgerResult, Rule};
use crate::models::{InterestRate, RateType};

/// One budget's position inside a loan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetShare {
    pub budget_id: i64,
    pub first_funded_at: i64,
    /// Rate snapshot from the budget's latest funding.
    pub rate: Option<InterestRate>,
    pub invested: Decimal,
    pub outstanding_principal: Decimal,
    pub outstanding_interest: Decimal,
    pub outstanding_fees: Decimal,
    pub paid_principal: Decimal,
    pub paid_interest: Decimal,
    pub paid_fees: Decimal,
    pub forgiven_principal: Decimal,
    pub forgiven_interest: Decimal,
    pub forgiven_fees: Decimal,
}

impl BudgetShare {
    fn new(budget_id: i64, at: i64) -> Self {
        Self {
            budget_id,
            first_funded_at: at,
            rate: None,
            invested: Decimal::ZERO,
            outstanding_principal: Decimal::ZERO,
            outstanding_interest: Decimal::ZERO,
            outstanding_fees: Decimal::ZERO,
            paid_principal: Decimal::ZERO,
            paid_interest: Decimal::ZERO,
            paid_fees: Decimal::ZERO,
            forgiven_principal: Decimal::ZERO,
            forgiven_interest: Decimal::ZERO,
            forgiven_fees: Decimal::ZERO,
        }
    }

    /// Everything returned to the budget so far.
    pub fn withdrawn(&self) -> LedgerResult<Decimal> {
        Ok(arith::sum([
            self.paid_principal,
            self.paid_interest,
            self.paid_fees,
        ])?)
    }

    fn owed(&self) -> LedgerResult<Decimal> {
        Ok(arith::sum([
            self.outstanding_principal,
            self.outstanding_interest,
            self.outstanding_fees,
        ])?)
    }
}

/// Signed change one transaction made to a budget's outstanding buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Allocation {
    pub budget_id: i64,
    pub principal: Decimal,
    pub interest: Decimal,
    pub fees: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Interest,
    Fees,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sink {
    Paid,
    Forgiven,
}

/// Loan-level sums across every share.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Totals {
    pub invested: Decimal,
    pub outstanding_principal: Decimal,
    pub outstanding_interest: Decimal,
    pub outstanding_fees: Decimal,
    pub paid_principal: Decimal,
    pub paid_interest: Decimal,
    pub paid_fees: Decimal,
    pub forgiven_principal: Decimal,
    pub forgiven_interest: Decimal,
    pub forgiven_fees: Decimal,
}

/// Splits `amount` across `weights` in proportion. The largest weight takes
/// whatever the others leave so the parts always sum to `amount`.
pub fn split_proportional(
    amount: Decimal,
    weights: &[(i64, Decimal)],
) -> LedgerResult<Vec<(i64, Decimal)>> {
    let weights: Vec<(i64, Decimal)> = weights
        .iter()
        .copied()
        .filter(|(_, w)| *w > Decimal::ZERO)
        .collect();
    if weights.is_empty() {
        return Ok(Vec::new());
    }
    if amount.is_zero() {
        return Ok(weights.iter().map(|(id, _)| (*id, Decimal::ZERO)).collect());
    }
    let total = arith::sum(weights.iter().map(|(_, w)| *w))?;
    let mut anchor = 0;
    for (i, (_, w)) in weights.iter().enumerate() {
        if *w > weights[anchor].1 {
            anchor = i;
        }
    }
    let mut parts = Vec::with_capacity(weights.len());
    let mut assigned = Decimal::ZERO;
    for (i, (id, w)) in weights.iter().enumerate() {
        if i == anchor {
            parts.push((*id, Decimal::ZERO));
            continue;
        }
        let part = arith::mul(amount, arith::div(*w, total)?)?;
        assigned = arith::add(assigned, part)?;
        parts.push((*id, part));
    }
    parts[anchor].1 = arith::sub(amount, assigned)?;
    Ok(parts)
}

#[derive(Debug, Clone, Default)]
pub struct Book {
    shares: BTreeMap<i64, BudgetShare>,
}

impl Book {
    pub fn shares(&self) -> impl Iterator<Item = &BudgetShare> {
        self.shares.values()
    }

    pub fn share(&self, budget_id: i64) -> Option<&BudgetShare> {
        self.shares.get(&budget_id)
    }

    pub fn into_shares(self) -> Vec<BudgetShare> {
        self.shares.into_values().collect()
    }

    pub fn fund(
        &mut self,
        budget_id: i64,
        amount: Decimal,
        at: i64,
        snapshot: Option<&InterestRate>,
    ) -> LedgerResult<Vec<Allocation>> {
        let share = self
            .shares
            .entry(budget_id)
            .or_insert_with(|| BudgetShare::new(budget_id, at));
        if let Some(rate) = snapshot {
            share.rate = Some(rate.clone());
        }
        share.invested = arith::add(share.invested, amount)?;
        share.outstanding_principal = arith::add(share.outstanding_principal, amount)?;
        Ok(vec![Allocation {
            budget_id,
            principal: amount,
            ..Allocation::default()
        }])
    }

    /// Accrues `hours` on every share with live principal. A share whose
    /// snapshot governs it accrues at that rate. The others follow `loan_rate`;
    /// a fixed loan amount is split between them by live principal.
    pub fn accrue(&mut self, loan_rate: &InterestRate, hours: i64) -> LedgerResult<Decimal> {
        let live: Vec<(i64, Decimal)> = self
            .shares
            .values()
            .filter(|s| arith::round2(s.outstanding_principal) > Decimal::ZERO)
            .map(|s| (s.budget_id, s.outstanding_principal))
            .collect();
        if live.is_empty() {
            return Ok(Decimal::ZERO);
        }
        let fixed: BTreeMap<i64, Decimal> = match loan_rate.rate_type {
            RateType::FixedPerDuration => {
                let principal = arith::sum(live.iter().map(|(_, p)| *p))?;
                let amount = interest::accrue(loan_rate, principal, Decimal::ZERO, hours)?;
                split_proportional(amount, &live)?.into_iter().collect()
            }
            RateType::PercentagePerDuration => BTreeMap::new(),
        };

        let mut total = Decimal::ZERO;
        for (id, principal) in live {
            let share = self.share_mut(id)?;
            let accrued = match share.rate.as_ref().filter(|r| r.governs_share()) {
                Some(own) => interest::accrue(own, principal, share.outstanding_interest, hours)?,
                None => match loan_rate.rate_type {
                    RateType::PercentagePerDuration => {
                        interest::accrue(loan_rate, principal, share.outstanding_interest, hours)?
                    }
                    RateType::FixedPerDuration => fixed.get(&id).copied().unwrap_or_default(),
                },
            };
            share.outstanding_interest = arith::add(share.outstanding_interest, accrued)?;
            total = arith::add(total, accrued)?;
        }
        Ok(total)
    }

    /// Payment: interest, then fees, then principal. Principal may go negative.
    /// A payment received by a funding budget settles that budget's share only.
    pub fn pay(
        &mut self,
        amount: Decimal,
        target: Option<i64>,
        at: i64,
    ) -> LedgerResult<Vec<Allocation>> {
        match target {
            Some(id) => {
                self.target(id, at)?;
            }
            None => self.require_funded(at)?,
        }
        self.distribute(amount, target, Sink::Paid, at)
    }

    /// Write-off in the same bucket order as a payment, never beyond what is owed.
    pub fn forgive(
        &mut self,
        amount: Decimal,
        target: Option<i64>,
        at: i64,
    ) -> LedgerResult<Vec<Allocation>> {
        let owed = match target {
            Some(id) => self.target(id, at)?.owed()?,
            None => {
                self.require_funded(at)?;
                arith::sum(
                    self.shares
                        .values()
                        .map(|s| s.owed())
                        .collect::<LedgerResult<Vec<_>>>()?,
                )?
            }
        };
        if arith::round2(amount) > arith::round2(owed) {
            return Err(LedgerError::violation(
                Rule::ForgivenessLimit,
                Some(at),
                format!(
                    "forgiving {} exceeds the {} still owed",
                    amount,
                    arith::round2(owed)
                ),
            ));
        }
        self.distribute(amount, target, Sink::Forgiven, at)
    }

    /// Manual interest or fee. A negative principal (overpayment) absorbs the
    /// charge first; the rest becomes outstanding interest or fees.
    pub fn charge(
        &mut self,
        amount: Decimal,
        bucket: Bucket,
        target: Option<i64>,
        at: i64,
    ) -> LedgerResult<Vec<Allocation>> {
        let parts = match target {
            Some(id) => {
                self.target(id, at)?;
                vec![(id, amount)]
            }
            None => {
                let weights = self.principal_weights(None);
                if weights.is_empty() {
                    return Err(LedgerError::violation(
                        Rule::Unfunded,
                        Some(at),
                        "no budget holds principal in this loan",
                    ));
                }
                split_proportional(amount, &weights)?
            }
        };
        let mut allocations = Vec::with_capacity(parts.len());
        for (id, part) in parts {
            let share = self.share_mut(id)?;
            let overpaid = arith::floor_zero(-share.outstanding_principal);
            let absorbed = arith::min(part, overpaid);
            let rest = arith::sub(part, absorbed)?;
            if absorbed > Decimal::ZERO {
                share.outstanding_principal = arith::add(share.outstanding_principal, absorbed)?;
                share.paid_principal = arith::sub(share.paid_principal, absorbed)?;
                match bucket {
                    Bucket::Interest => {
                        share.paid_interest = arith::add(share.paid_interest, absorbed)?
                    }
                    Bucket::Fees => share.paid_fees = arith::add(share.paid_fees, absorbed)?,
                }
            }
            let mut allocation = Allocation {
                budget_id: id,
                principal: absorbed,
                ..Allocation::default()
            };
            match bucket {
                Bucket::Interest => {
                    share.outstanding_interest = arith::add(share.outstanding_interest, rest)?;
                    allocation.interest = rest;
                }
                Bucket::Fees => {
                    share.outstanding_fees = arith::add(share.outstanding_fees, rest)?;
                    allocation.fees = rest;
                }
            }
            allocations.push(allocation);
        }
        Ok(allocations)
    }

    /// Returns paid principal to the borrower, reopening outstanding principal.
    pub fn refund(
        &mut self,
        amount: Decimal,
        target: Option<i64>,
        at: i64,
    ) -> LedgerResult<Vec<Allocation>> {
        if let Some(id) = target {
            self.target(id, at)?;
        } else {
            self.require_funded(at)?;
        }
        let weights = self.weights(target, |s| s.paid_principal);
        let refundable = arith::sum(weights.iter().map(|(_, w)| *w))?;
        if arith::round2(amount) > arith::round2(refundable) {
            return Err(LedgerError::violation(
                Rule::RefundLimit,
                Some(at),
                format!(
                    "refunding {} exceeds the {} of principal paid",
                    amount,
                    arith::round2(refundable)
                ),
            ));
        }
        let mut allocations = Vec::new();
        for (id, part) in split_proportional(amount, &weights)? {
            let share = self.share_mut(id)?;
            share.paid_principal = arith::sub(share.paid_principal, part)?;
            share.outstanding_principal = arith::add(share.outstanding_principal, part)?;
            allocations.push(Allocation {
                budget_id: id,
                principal: part,
                ..Allocation::default()
            });
        }
        Ok(allocations)
    }

    /// Clears rounding dust: principal that rounds to zero becomes zero, and
    /// interest/fees snap to zero once the principal is paid down.
    pub fn snap(&mut self) {
        for share in self.shares.values_mut() {
            if arith::is_zero2(share.outstanding_principal) {
                share.outstanding_principal = Decimal::ZERO;
            }
            let paid_down = share.outstanding_principal <= Decimal::ZERO;
            for bucket in [&mut share.outstanding_interest, &mut share.outstanding_fees] {
                if arith::is_zero2(*bucket) && (paid_down || bucket.is_sign_negative()) {
                    *bucket = Decimal::ZERO;
                }
            }
        }
    }

    pub fn totals(&self) -> LedgerResult<Totals> {
        let s = || self.shares.values();
        Ok(Totals {
            invested: arith::sum(s().map(|x| x.invested))?,
            outstanding_principal: arith::sum(s().map(|x| x.outstanding_principal))?,
            outstanding_interest: arith::sum(s().map(|x| x.outstanding_interest))?,
            outstanding_fees: arith::sum(s().map(|x| x.outstanding_fees))?,
            paid_principal: arith::sum(s().map(|x| x.paid_principal))?,
            paid_interest: arith::sum(s().map(|x| x.paid_interest))?,
            paid_fees: arith::sum(s().map(|x| x.paid_fees))?,
            forgiven_principal: arith::sum(s().map(|x| x.forgiven_principal))?,
            forgiven_interest: arith::sum(s().map(|x| x.forgiven_interest))?,
            forgiven_fees: arith::sum(s().map(|x| x.forgiven_fees))?,
        })
    }

    fn distribute(
        &mut self,
        amount: Decimal,
        target: Option<i64>,
        sink: Sink,
        at: i64,
    ) -> LedgerResult<Vec<Allocation>> {
        let mut allocations: BTreeMap<i64, Allocation> = BTreeMap::new();
        let mut remaining = amount;

        for bucket in [Bucket::Interest, Bucket::Fees] {
            let weights = match bucket {
                Bucket::Interest => self.weights(target, |s| s.outstanding_interest),
                Bucket::Fees => self.weights(target, |s| s.outstanding_fees),
            };
            let owed = arith::sum(weights.iter().map(|(_, w)| *w))?;
            let part = arith::min(remaining, owed);
            if part <= Decimal::ZERO {
                continue;
            }
            remaining = arith::sub(remaining, part)?;
            for (id, x) in split_proportional(part, &weights)? {
                let share = self.share_mut(id)?;
                let allocation = allocations.entry(id).or_insert_with(|| Allocation {
                    budget_id: id,
                    ..Allocation::default()
                });
                match (bucket, sink) {
                    (Bucket::Interest, _) => {
                        share.outstanding_interest = arith::sub(share.outstanding_interest, x)?;
                        allocation.interest = arith::sub(allocation.interest, x)?;
                    }
                    (Bucket::Fees, _) => {
                        share.outstanding_fees = arith::sub(share.outstanding_fees, x)?;
                        allocation.fees = arith::sub(allocation.fees, x)?;
                    }
                }
                match (bucket, sink) {
                    (Bucket::Interest, Sink::Paid) => {
                        share.paid_interest = arith::add(share.paid_interest, x)?
                    }
                    (Bucket::Interest, Sink::Forgiven) => {
                        share.forgiven_interest = arith::add(share.forgiven_interest, x)?
                    }
                    (Bucket::Fees, Sink::Paid) => share.paid_fees = arith::add(share.paid_fees, x)?,
                    (Bucket::Fees, Sink::Forgiven) => {
                        share.forgiven_fees = arith::add(share.forgiven_fees, x)?
                    }
                }
            }
        }

        if remaining > Decimal::ZERO {
            let weights = self.principal_weights(target);
            if weights.is_empty() {
                return Err(LedgerError::violation(
                    Rule::Unfunded,
                    Some(at),
                    "no budget holds principal in this loan",
                ));
            }
            for (id, x) in split_proportional(remaining, &weights)? {
                let share = self.share_mut(id)?;
                share.outstanding_principal = arith::sub(share.outstanding_principal, x)?;
                match sink {
                    Sink::Paid => share.paid_principal = arith::add(share.paid_principal, x)?,
                    Sink::Forgiven => {
                        share.forgiven_principal = arith::add(share.forgiven_principal, x)?
                    }
                }
                let allocation = allocations.entry(id).or_insert_with(|| Allocation {
                    budget_id: id,
                    ..Allocation::default()
                });
                allocation.principal = arith::sub(allocation.principal, x)?;
            }
        }
        Ok(allocations.into_values().collect())
    }

    /// Positive values of `f` per share, optionally restricted to one budget.
    fn weights<F>(&self, only: Option<i64>, f: F) -> Vec<(i64, Decimal)>
    where
        F: Fn(&BudgetShare) -> Decimal,
    {
        self.shares
            .values()
            .filter(|s| only.is_none_or(|id| id == s.budget_id))
            .map(|s| (s.budget_id, f(s)))
            .filter(|(_, w)| *w > Decimal::ZERO)
            .collect()
    }

    /// Live principal, or invested amounts once nothing is outstanding.
    fn principal_weights(&self, only: Option<i64>) -> Vec<(i64, Decimal)> {
        let live = self.weights(only, |s| s.outstanding_principal);
        if live.is_empty() {
            self.weights(only, |s| s.invested)
        } else {
            live
        }
    }

    fn require_funded(&self, at: i64) -> LedgerResult<()> {
        if self.shares.is_empty() {
            return Err(LedgerError::violation(
                Rule::Unfunded,
                Some(at),
                "the loan has not been funded by any budget yet",
            ));
        }
        Ok(())
    }

    fn target(&self, budget_id: i64, at: i64) -> LedgerResult<&BudgetShare> {
        self.shares.get(&budget_id).ok_or_else(|| {
            LedgerError::violation(
                Rule::Unfunded,
                Some(at),
                format!("budget {} has not funded this loan", budget_id),
            )
        })
    }

    fn share_mut(&mut self, budget_id: i64) -> LedgerResult<&mut BudgetShare> {
        self.shares
            .get_mut(&budget_id)
            .ok_or(LedgerError::NotFound {
                kind: "budget share",
                id: budget_id,
            })
    }
}
