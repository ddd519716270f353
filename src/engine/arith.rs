// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Guarded money arithmetic.
//!
//! Every balance the engine derives goes through these functions. Operands and
//! results are bounded by [`SAFE_CEILING`], each operation is evaluated twice
//! and compared byte-for-byte, and results are rounded to
//! [`SIGNIFICANT_DIGITS`] significant digits.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::ArithmeticError;

/// 900,000,000,000
pub const SAFE_CEILING: Decimal = Decimal::from_parts(2_351_835_136, 209, 0, false, 0);
pub const SIGNIFICANT_DIGITS: u32 = 15;

type Outcome = Result<Decimal, ArithmeticError>;

pub fn from_f64(value: f64) -> Outcome {
    if !value.is_finite() {
        return Err(ArithmeticError::NonFinite(value));
    }
    let d = Decimal::try_from(value).map_err(|_| ArithmeticError::Overflow { op: "from_f64" })?;
    bounded("from_f64", d)?;
    finish("from_f64", d)
}

pub fn add(a: Decimal, b: Decimal) -> Outcome {
    guarded("add", a, b, |x, y| x.checked_add(y))
}

pub fn sub(a: Decimal, b: Decimal) -> Outcome {
    guarded("sub", a, b, |x, y| x.checked_sub(y))
}

pub fn mul(a: Decimal, b: Decimal) -> Outcome {
    guarded("mul", a, b, |x, y| x.checked_mul(y))
}

pub fn div(a: Decimal, b: Decimal) -> Outcome {
    if b.is_zero() {
        return Err(ArithmeticError::DivisionByZero { op: "div" });
    }
    guarded("div", a, b, |x, y| x.checked_div(y))
}

pub fn sum<I>(values: I) -> Outcome
where
    I: IntoIterator<Item = Decimal>,
{
    values.into_iter().try_fold(Decimal::ZERO, add)
}

pub fn min(a: Decimal, b: Decimal) -> Decimal {
    if a <= b { a } else { b }
}

/// Positive part.
pub fn floor_zero(v: Decimal) -> Decimal {
    if v.is_sign_positive() { v } else { Decimal::ZERO }
}

/// Two-decimal rounding used for zero-crossing and equality checks.
pub fn round2(v: Decimal) -> Decimal {
    v.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

pub fn is_zero2(v: Decimal) -> bool {
    round2(v).is_zero()
}

fn guarded<F>(op: &'static str, a: Decimal, b: Decimal, f: F) -> Outcome
where
    F: Fn(Decimal, Decimal) -> Option<Decimal>,
{
    bounded(op, a)?;
    bounded(op, b)?;
    let first = f(a, b).ok_or(ArithmeticError::Overflow { op })?;
    let second = f(a, b).ok_or(ArithmeticError::Overflow { op })?;
    if first.serialize() != second.serialize() {
        return Err(ArithmeticError::Nondeterministic { op, first, second });
    }
    let result = finish(op, first)?;
    bounded(op, result)?;
    Ok(result)
}

fn bounded(op: &'static str, v: Decimal) -> Result<(), ArithmeticError> {
    if v.abs() > SAFE_CEILING {
        return Err(ArithmeticError::OutOfRange { op, value: v });
    }
    Ok(())
}

fn finish(op: &'static str, v: Decimal) -> Outcome {
    if v.is_zero() {
        return Ok(Decimal::ZERO);
    }
    v.round_sf_with_strategy(SIGNIFICANT_DIGITS, RoundingStrategy::MidpointAwayFromZero)
        .map(|r| r.normalize())
        .ok_or(ArithmeticError::Overflow { op })
}
