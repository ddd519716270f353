// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Loan status machine.
//!
//! ```text
//! ACTIVE <-> PAID          (automatic, on every recompute)
//! ACTIVE  -> PAUSED -> ACTIVE
//! PAID    -> COMPLETED
//! any non-terminal -> DEFAULTED
//! ```

use rust_decimal::Decimal;

use crate::engine::arith;
use crate::error::{LedgerError, LedgerResult};
use crate::models::{LoanStatus, LoanSummary};

/// Principal fully repaid with nothing left owing.
pub fn is_paid_off(summary: &LoanSummary) -> bool {
    summary.invested > Decimal::ZERO
        && arith::round2(summary.paid_principal) >= arith::round2(summary.invested)
        && arith::is_zero2(summary.outstanding_interest)
        && arith::is_zero2(summary.outstanding_fees)
}

/// Automatic ACTIVE/PAID flip after a recompute. Other states are left alone.
pub fn reconcile(status: LoanStatus, summary: &LoanSummary) -> LoanStatus {
    match status {
        LoanStatus::Active if is_paid_off(summary) => LoanStatus::Paid,
        LoanStatus::Paid if !is_paid_off(summary) => LoanStatus::Active,
        other => other,
    }
}

/// Applies a manual status change and returns the resulting status.
pub fn transition(
    current: LoanStatus,
    target: LoanStatus,
    summary: &LoanSummary,
) -> LedgerResult<LoanStatus> {
    if current.is_terminal() {
        return Err(LedgerError::Lifecycle(format!(
            "{} is terminal",
            current.as_str()
        )));
    }
    match (current, target) {
        (_, LoanStatus::Paid) => Err(LedgerError::Lifecycle(
            "PAID is derived from the balance and cannot be set by hand".into(),
        )),
        (LoanStatus::Active, LoanStatus::Paused) => Ok(LoanStatus::Paused),
        (LoanStatus::Paused, LoanStatus::Active) => Ok(reconcile(LoanStatus::Active, summary)),
        (LoanStatus::Paid, LoanStatus::Completed) => {
            if arith::round2(summary.invested) != arith::round2(summary.paid_principal) {
                return Err(LedgerError::Lifecycle(format!(
                    "cannot complete: invested {} but {} principal paid back",
                    arith::round2(summary.invested),
                    arith::round2(summary.paid_principal)
                )));
            }
            Ok(LoanStatus::Completed)
        }
        (_, LoanStatus::Defaulted) => Ok(LoanStatus::Defaulted),
        (from, to) => Err(LedgerError::Lifecycle(format!(
            "cannot move a loan from {} to {}",
            from.as_str(),
            to.as_str()
        ))),
    }
}
