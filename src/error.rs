// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use std::fmt;

use rust_decimal::Decimal;
use thiserror::Error;

/// Ledger rule whose violation rejected a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// A budget's running balance may never dip below zero.
    BudgetSolvency,
    /// Loan transactions may not predate the loan's opening.
    LoanWindow,
    /// Completed and defaulted loans accept no further transactions.
    LoanClosed,
    /// A loan's outstanding principal may never go negative.
    LoanOverpayment,
    ForgivenessLimit,
    RefundLimit,
    /// Principal movements need at least one funding budget.
    Unfunded,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rule::BudgetSolvency => "budget solvency",
            Rule::LoanWindow => "loan window",
            Rule::LoanClosed => "loan closed",
            Rule::LoanOverpayment => "loan overpayment",
            Rule::ForgivenessLimit => "forgiveness limit",
            Rule::RefundLimit => "refund limit",
            Rule::Unfunded => "unfunded loan",
        };
        f.write_str(s)
    }
}

/// Guard failures from the deterministic arithmetic layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ArithmeticError {
    #[error("non-finite input {0}")]
    NonFinite(f64),

    #[error("{op}: magnitude of {value} exceeds the safe ceiling")]
    OutOfRange { op: &'static str, value: Decimal },

    #[error("{op} overflowed")]
    Overflow { op: &'static str },

    #[error("{op}: division by zero")]
    DivisionByZero { op: &'static str },

    #[error("{op}: two evaluations disagreed ({first} vs {second})")]
    Nondeterministic {
        op: &'static str,
        first: Decimal,
        second: Decimal,
    },
}

/// Errors surfaced by the ledger engine and its persistence layer.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{rule} violated{}: {message}", at_suffix(.at))]
    InvariantViolation {
        rule: Rule,
        message: String,
        at: Option<i64>,
    },

    #[error("arithmetic safety check failed: {0}")]
    ArithmeticSafety(#[from] ArithmeticError),

    #[error("illegal status change: {0}")]
    Lifecycle(String),

    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn at_suffix(at: &Option<i64>) -> String {
    match at.and_then(chrono::DateTime::from_timestamp_millis) {
        Some(dt) => format!(" at {}", dt.format("%Y-%m-%d %H:%M")),
        None => String::new(),
    }
}

impl LedgerError {
    pub fn violation(rule: Rule, at: Option<i64>, message: impl Into<String>) -> Self {
        LedgerError::InvariantViolation {
            rule,
            message: message.into(),
            at,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        LedgerError::Validation(message.into())
    }

    /// Rule that rejected the operation, if this is an invariant violation.
    pub fn rule(&self) -> Option<Rule> {
        match self {
            LedgerError::InvariantViolation { rule, .. } => Some(*rule),
            _ => None,
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
