// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Interest rates turned into hourly accruals and amortization projections.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, MathematicalOps};
use serde::Serialize;

use crate::engine::arith;
use crate::error::{ArithmeticError, LedgerError, LedgerResult};
use crate::models::{DAY_MS, HOUR_MS, InterestRate, PaymentFrequency, RateType};

const HOURS_PER_DAY: Decimal = Decimal::from_parts(24, 0, 0, false, 0);

/// Rate amount per day. FULL_DURATION rates have no daily equivalent.
pub fn normalize_to_day(rate: &InterestRate) -> LedgerResult<Decimal> {
    let days = rate.duration.days().ok_or_else(|| {
        LedgerError::validation("a full-duration rate has no daily equivalent")
    })?;
    Ok(arith::div(rate.amount, Decimal::from(days))?)
}

/// Hourly fraction (percentage rates) or hourly amount (fixed rates).
pub fn hourly_rate(rate: &InterestRate) -> LedgerResult<Decimal> {
    let hourly = arith::div(normalize_to_day(rate)?, HOURS_PER_DAY)?;
    match rate.rate_type {
        RateType::PercentagePerDuration => Ok(arith::div(hourly, Decimal::ONE_HUNDRED)?),
        RateType::FixedPerDuration => Ok(hourly),
    }
}

/// Interest accrued over `hours` whole hours on a positive principal.
///
/// Compounding percentage rates are stepped hour by hour on principal plus
/// interest already owed; simple rates are proportional; fixed rates ignore
/// the principal.
pub fn accrue(
    rate: &InterestRate,
    principal: Decimal,
    outstanding_interest: Decimal,
    hours: i64,
) -> LedgerResult<Decimal> {
    if hours <= 0 || rate.is_full_duration() || rate.amount.is_zero() {
        return Ok(Decimal::ZERO);
    }
    let hourly = hourly_rate(rate)?;
    let hours_d = Decimal::from(hours);
    match (rate.rate_type, rate.is_compounding) {
        (RateType::PercentagePerDuration, true) => {
            let base = arith::add(principal, outstanding_interest)?;
            let mut accrued = Decimal::ZERO;
            for _ in 0..hours {
                let step = arith::mul(arith::add(base, accrued)?, hourly)?;
                accrued = arith::add(accrued, step)?;
            }
            Ok(accrued)
        }
        (RateType::PercentagePerDuration, false) => {
            Ok(arith::mul(arith::mul(principal, hourly)?, hours_d)?)
        }
        (RateType::FixedPerDuration, _) => Ok(arith::mul(hourly, hours_d)?),
    }
}

/// One-time interest for a FULL_DURATION rate.
pub fn one_time_interest(rate: &InterestRate, principal: Decimal) -> LedgerResult<Decimal> {
    match rate.rate_type {
        RateType::FixedPerDuration => Ok(rate.amount),
        RateType::PercentagePerDuration => Ok(arith::div(
            arith::mul(principal, rate.amount)?,
            Decimal::ONE_HUNDRED,
        )?),
    }
}

/// Level payment that amortizes `loan_amount` over `number_of_payments`.
pub fn payment_amount(
    loan_amount: Decimal,
    rate_per_payment: Decimal,
    number_of_payments: i64,
) -> LedgerResult<Decimal> {
    if loan_amount <= Decimal::ZERO || rate_per_payment <= Decimal::ZERO || number_of_payments <= 0
    {
        return Err(LedgerError::validation(
            "payment amount needs a positive loan amount, rate and number of payments",
        ));
    }
    let growth = checked_pow(arith::add(Decimal::ONE, rate_per_payment)?, Decimal::from(number_of_payments))?;
    let discount = arith::sub(Decimal::ONE, arith::div(Decimal::ONE, growth)?)?;
    Ok(arith::div(arith::mul(loan_amount, rate_per_payment)?, discount)?)
}

/// Nominal per-period rate with `payments_per_period` compoundings that is
/// equivalent to `rate_per_period` compounded `compoundings_per_period` times.
pub fn equivalent_rate(
    rate_per_period: Decimal,
    compoundings_per_period: Decimal,
    payments_per_period: Decimal,
) -> LedgerResult<Decimal> {
    if rate_per_period <= Decimal::ZERO
        || compoundings_per_period <= Decimal::ZERO
        || payments_per_period <= Decimal::ZERO
    {
        return Err(LedgerError::validation(
            "equivalent rate needs a positive rate, compounding count and payment count",
        ));
    }
    let per_compounding = arith::div(rate_per_period, compoundings_per_period)?;
    let exponent = arith::div(compoundings_per_period, payments_per_period)?;
    let growth = checked_pow(arith::add(Decimal::ONE, per_compounding)?, exponent)?;
    Ok(arith::mul(payments_per_period, arith::sub(growth, Decimal::ONE)?)?)
}

fn checked_pow(base: Decimal, exponent: Decimal) -> LedgerResult<Decimal> {
    let raw = if exponent.fract().is_zero() {
        let n = exponent
            .to_i64()
            .ok_or(ArithmeticError::Overflow { op: "pow" })?;
        base.checked_powi(n)
    } else {
        base.checked_powd(exponent)
    };
    let value = raw.ok_or(ArithmeticError::Overflow { op: "pow" })?;
    // Route through the guard so the result is bounded and rounded like every other value.
    Ok(arith::add(value, Decimal::ZERO)?)
}

/// Effective-dated list of rates for one loan.
#[derive(Debug, Clone, PartialEq)]
pub struct RateSchedule {
    versions: Vec<InterestRate>,
}

impl RateSchedule {
    pub fn single(rate: InterestRate) -> Self {
        Self {
            versions: vec![rate],
        }
    }

    pub fn new(mut versions: Vec<InterestRate>) -> LedgerResult<Self> {
        if versions.is_empty() {
            return Err(LedgerError::validation("a rate schedule needs at least one rate"));
        }
        versions.sort_by_key(|r| r.entry_timestamp);
        Ok(Self { versions })
    }

    /// Rate in effect at `ts`; the earliest rate covers anything before it.
    pub fn at(&self, ts: i64) -> &InterestRate {
        self.versions
            .iter()
            .rev()
            .find(|r| r.entry_timestamp <= ts)
            .unwrap_or(&self.versions[0])
    }

    pub fn current(&self) -> &InterestRate {
        &self.versions[self.versions.len() - 1]
    }

    pub fn has_periodic(&self) -> bool {
        self.versions.iter().any(|r| !r.is_full_duration())
    }

    /// Splits `hours` hour-steps starting at `start` by the rate in effect at each step start.
    pub fn hours_by_rate(&self, start: i64, hours: i64) -> Vec<(&InterestRate, i64)> {
        let mut out: Vec<(&InterestRate, i64)> = Vec::new();
        if hours <= 0 {
            return out;
        }
        let mut step = 0;
        while step < hours {
            let step_start = start + step * HOUR_MS;
            let rate = self.at(step_start);
            let next_change = self
                .versions
                .iter()
                .map(|r| r.entry_timestamp)
                .filter(|ts| *ts > step_start)
                .min();
            let span = match next_change {
                Some(change) => {
                    let until = (change - start + HOUR_MS - 1) / HOUR_MS;
                    until.min(hours) - step
                }
                None => hours - step,
            };
            let span = span.max(1);
            step += span;
            if let Some((r, n)) = out.last_mut() {
                if *r == rate {
                    *n += span;
                    continue;
                }
            }
            out.push((rate, span));
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedPayment {
    pub number: u32,
    pub due_timestamp: i64,
    pub payment: Decimal,
    pub interest: Decimal,
    pub principal: Decimal,
    pub remaining_principal: Decimal,
}

/// Payment schedule for a prospective loan, independent of any ledger.
pub fn project_amortization(
    opened_at: i64,
    closes_at: i64,
    rate: &InterestRate,
    principal: Decimal,
    frequency: PaymentFrequency,
) -> LedgerResult<Vec<ProjectedPayment>> {
    if closes_at <= opened_at {
        return Err(LedgerError::validation("loan must close after it opens"));
    }
    if principal <= Decimal::ZERO {
        return Err(LedgerError::validation("principal must be positive"));
    }
    rate.validate()?;
    let period_ms = frequency.days() * DAY_MS;
    let count = ((closes_at - opened_at + period_ms - 1) / period_ms).max(1);
    let count_d = Decimal::from(count);

    // Interest for a payment given the principal still owed before it.
    let per_payment: Box<dyn Fn(Decimal) -> LedgerResult<Decimal>> = if rate.amount.is_zero() {
        Box::new(|_| Ok(Decimal::ZERO))
    } else if rate.is_full_duration() {
        let total = one_time_interest(rate, principal)?;
        let even = arith::div(total, count_d)?;
        Box::new(move |_| Ok(even))
    } else if rate.rate_type == RateType::FixedPerDuration {
        let flat = arith::mul(
            normalize_to_day(rate)?,
            Decimal::from(frequency.days()),
        )?;
        Box::new(move |_| Ok(flat))
    } else {
        let periodic = periodic_rate_per_payment(rate, frequency)?;
        Box::new(move |remaining| Ok(arith::mul(remaining, periodic)?))
    };

    let level = if rate.is_periodic_percentage() && !rate.amount.is_zero() {
        Some(payment_amount(
            principal,
            periodic_rate_per_payment(rate, frequency)?,
            count,
        )?)
    } else {
        None
    };
    let even_principal = arith::div(principal, count_d)?;

    let mut rows = Vec::with_capacity(count as usize);
    let mut remaining = principal;
    for i in 1..=count {
        let interest = per_payment(remaining)?;
        let last = i == count;
        let principal_part = if last {
            remaining
        } else {
            match level {
                Some(payment) => arith::min(arith::sub(payment, interest)?, remaining),
                None => arith::min(even_principal, remaining),
            }
        };
        remaining = arith::sub(remaining, principal_part)?;
        rows.push(ProjectedPayment {
            number: i as u32,
            due_timestamp: (opened_at + i * period_ms).min(closes_at),
            payment: arith::add(principal_part, interest)?,
            interest,
            principal: principal_part,
            remaining_principal: remaining,
        });
    }
    Ok(rows)
}

fn periodic_rate_per_payment(
    rate: &InterestRate,
    frequency: PaymentFrequency,
) -> LedgerResult<Decimal> {
    let days = rate.duration.days().ok_or_else(|| {
        LedgerError::validation("a full-duration rate has no per-payment equivalent")
    })?;
    let payments_per_period = arith::div(Decimal::from(days), Decimal::from(frequency.days()))?;
    let compoundings = if rate.is_compounding {
        Decimal::from(days * 24)
    } else {
        payments_per_period
    };
    let rate_per_period = arith::div(rate.amount, Decimal::ONE_HUNDRED)?;
    let nominal = equivalent_rate(rate_per_period, compoundings, payments_per_period)?;
    Ok(arith::div(nominal, payments_per_period)?)
}
