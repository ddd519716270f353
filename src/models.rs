// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

pub const HOUR_MS: i64 = 3_600_000;
pub const DAY_MS: i64 = 24 * HOUR_MS;
/// 5000-01-01T00:00:00Z
pub const MAX_TIMESTAMP_MS: i64 = 95_617_584_000_000;

pub fn validate_timestamp(ms: i64, what: &str) -> LedgerResult<i64> {
    if !(0..MAX_TIMESTAMP_MS).contains(&ms) || chrono::DateTime::from_timestamp_millis(ms).is_none()
    {
        return Err(LedgerError::validation(format!(
            "{} {} is outside the supported date range",
            what, ms
        )));
    }
    Ok(ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AddressKind {
    Budget,
    Loan,
    Fee,
    Outside,
    Forgiveness,
    Interest,
}

impl AddressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Budget => "BUDGET",
            AddressKind::Loan => "LOAN",
            AddressKind::Fee => "FEE",
            AddressKind::Outside => "OUTSIDE",
            AddressKind::Forgiveness => "FORGIVENESS",
            AddressKind::Interest => "INTEREST",
        }
    }

    /// Budgets and loans are ledgered entities; everything else is a synthetic counterparty.
    pub fn is_entity(&self) -> bool {
        matches!(self, AddressKind::Budget | AddressKind::Loan)
    }
}

impl FromStr for AddressKind {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUDGET" => Ok(AddressKind::Budget),
            "LOAN" => Ok(AddressKind::Loan),
            "FEE" => Ok(AddressKind::Fee),
            "OUTSIDE" => Ok(AddressKind::Outside),
            "FORGIVENESS" => Ok(AddressKind::Forgiveness),
            "INTEREST" => Ok(AddressKind::Interest),
            other => Err(LedgerError::validation(format!(
                "unknown address kind '{}'",
                other
            ))),
        }
    }
}

/// One side of a transaction. Synthetic kinds may carry a budget id to target a
/// manual charge, forgiveness or refund at that budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub kind: AddressKind,
    pub id: Option<i64>,
}

impl Address {
    pub fn budget(id: i64) -> Self {
        Self {
            kind: AddressKind::Budget,
            id: Some(id),
        }
    }

    pub fn loan(id: i64) -> Self {
        Self {
            kind: AddressKind::Loan,
            id: Some(id),
        }
    }

    pub fn synthetic(kind: AddressKind, target: Option<i64>) -> Self {
        Self { kind, id: target }
    }

    pub fn outside() -> Self {
        Self::synthetic(AddressKind::Outside, None)
    }

    pub fn is(&self, kind: AddressKind, id: i64) -> bool {
        self.kind == kind && self.id == Some(id)
    }

    pub fn budget_id(&self) -> Option<i64> {
        (self.kind == AddressKind::Budget).then_some(self.id).flatten()
    }

    pub fn loan_id(&self) -> Option<i64> {
        (self.kind == AddressKind::Loan).then_some(self.id).flatten()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.id {
            Some(id) => write!(f, "{}:{}", self.kind.as_str(), id),
            None => f.write_str(self.kind.as_str()),
        }
    }
}

/// Parses `budget:3`, `loan:7`, `outside`, `interest:3`.
impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, id) = match s.split_once(':') {
            Some((k, id)) => {
                let id = id
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| LedgerError::validation(format!("invalid address id in '{}'", s)))?;
                (k.parse::<AddressKind>()?, Some(id))
            }
            None => (s.parse::<AddressKind>()?, None),
        };
        if kind.is_entity() && id.is_none() {
            return Err(LedgerError::validation(format!(
                "{} address needs an id, e.g. {}:1",
                kind.as_str(),
                kind.as_str().to_lowercase()
            )));
        }
        Ok(Address { kind, id })
    }
}

/// Economic meaning of a transaction, derived from its from/to pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Funding,
    Payment,
    ManualInterest,
    ManualFee,
    Forgiveness,
    Refund,
    /// Zero-amount marker injected at the replay horizon.
    Mark,
}

impl TransactionKind {
    pub fn classify(from: &Address, to: &Address) -> LedgerResult<Self> {
        use AddressKind::*;
        let kind = match (from.kind, to.kind) {
            (Outside, Budget) => TransactionKind::Deposit,
            (Budget, Outside) => TransactionKind::Withdrawal,
            (Budget, Loan) => TransactionKind::Funding,
            (Loan, Budget) | (Loan, Outside) => TransactionKind::Payment,
            (Interest, Loan) => TransactionKind::ManualInterest,
            (Fee, Loan) => TransactionKind::ManualFee,
            (Loan, Forgiveness) => TransactionKind::Forgiveness,
            (Outside, Loan) => TransactionKind::Refund,
            _ => {
                return Err(LedgerError::validation(format!(
                    "unsupported transaction direction {} -> {}",
                    from, to
                )));
            }
        };
        for side in [from, to] {
            if side.kind.is_entity() && side.id.is_none() {
                return Err(LedgerError::validation(format!(
                    "{} address is missing its id",
                    side.kind.as_str()
                )));
            }
        }
        Ok(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Funding => "funding",
            TransactionKind::Payment => "payment",
            TransactionKind::ManualInterest => "interest",
            TransactionKind::ManualFee => "fee",
            TransactionKind::Forgiveness => "forgiveness",
            TransactionKind::Refund => "refund",
            TransactionKind::Mark => "mark",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateType {
    PercentagePerDuration,
    FixedPerDuration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RateDuration {
    Day,
    Week,
    Month,
    Year,
    FullDuration,
}

impl RateDuration {
    /// Days per duration; `None` for FULL_DURATION.
    pub fn days(&self) -> Option<i64> {
        match self {
            RateDuration::Day => Some(1),
            RateDuration::Week => Some(7),
            RateDuration::Month => Some(30),
            RateDuration::Year => Some(365),
            RateDuration::FullDuration => None,
        }
    }
}

impl FromStr for RateType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "percentage" | "percentage_per_duration" | "pct" => Ok(RateType::PercentagePerDuration),
            "fixed" | "fixed_per_duration" => Ok(RateType::FixedPerDuration),
            other => Err(LedgerError::validation(format!("unknown rate type '{}'", other))),
        }
    }
}

impl FromStr for RateDuration {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(RateDuration::Day),
            "week" => Ok(RateDuration::Week),
            "month" => Ok(RateDuration::Month),
            "year" => Ok(RateDuration::Year),
            "full" | "full_duration" => Ok(RateDuration::FullDuration),
            other => Err(LedgerError::validation(format!(
                "unknown rate duration '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterestRate {
    pub rate_type: RateType,
    pub duration: RateDuration,
    pub amount: Decimal,
    pub is_compounding: bool,
    /// Moment this rate took effect.
    pub entry_timestamp: i64,
}

impl InterestRate {
    pub fn zero(entry_timestamp: i64) -> Self {
        Self {
            rate_type: RateType::PercentagePerDuration,
            duration: RateDuration::Year,
            amount: Decimal::ZERO,
            is_compounding: false,
            entry_timestamp,
        }
    }

    pub fn is_full_duration(&self) -> bool {
        self.duration == RateDuration::FullDuration
    }

    pub fn is_periodic_percentage(&self) -> bool {
        self.rate_type == RateType::PercentagePerDuration && !self.is_full_duration()
    }

    /// A funding snapshot with this rate accrues its budget's share on its own.
    pub fn governs_share(&self) -> bool {
        self.is_periodic_percentage() && !self.amount.is_zero()
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.amount.is_sign_negative() {
            return Err(LedgerError::validation("interest rate amount must be >= 0"));
        }
        validate_timestamp(self.entry_timestamp, "rate entry timestamp")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub owner: String,
    pub transaction_timestamp: i64,
    pub entry_timestamp: i64,
    pub description: String,
    pub amount: Decimal,
    pub from: Address,
    pub to: Address,
    /// Rate snapshot for BUDGET -> LOAN fundings.
    pub interest_rate: Option<InterestRate>,
    pub version: i64,
}

impl Transaction {
    pub fn kind(&self) -> LedgerResult<TransactionKind> {
        TransactionKind::classify(&self.from, &self.to)
    }

    pub fn touches(&self, address: &Address) -> bool {
        self.from == *address || self.to == *address
    }

    pub fn loan_id(&self) -> Option<i64> {
        self.from.loan_id().or_else(|| self.to.loan_id())
    }

    pub fn budget_ids(&self) -> Vec<i64> {
        [self.from.budget_id(), self.to.budget_id()]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Chronological order: effective time, then recording time, then id.
    pub fn chronological(a: &Transaction, b: &Transaction) -> Ordering {
        a.transaction_timestamp
            .cmp(&b.transaction_timestamp)
            .then(a.entry_timestamp.cmp(&b.entry_timestamp))
            .then(a.id.cmp(&b.id))
    }

    /// Newest-first order used by history reads.
    pub fn newest_first(a: &Transaction, b: &Transaction) -> Ordering {
        Self::chronological(b, a)
    }
}

/// Caller-supplied fields of a transaction proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub transaction_timestamp: i64,
    pub description: String,
    pub amount: Decimal,
    pub from: Address,
    pub to: Address,
    pub interest_rate: Option<InterestRate>,
}

/// Partial update for an existing transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionEdit {
    pub transaction_timestamp: Option<i64>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
}

/// Archived prior version of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionVersion {
    pub transaction_id: i64,
    pub version: i64,
    pub archived_at: i64,
    pub snapshot: Transaction,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BudgetStats {
    pub invested: Decimal,
    pub withdrawn: Decimal,
    pub available: Decimal,
    pub currently_lent: Decimal,
    pub total_lent: Decimal,
    pub paid_back_principal: Decimal,
    pub earned_interest: Decimal,
    pub earned_fees: Decimal,
    pub forgiven_principal: Decimal,
    pub forgiven_interest: Decimal,
    pub forgiven_fees: Decimal,
    pub defaulted_principal: Decimal,
    pub loan_count: i64,
    pub live_loan_count: i64,
    pub average_loan_size: Decimal,
    pub average_loan_duration_days: Decimal,
    pub last_transaction_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub description: String,
    pub default_interest_rate: InterestRate,
    pub is_archived: bool,
    pub current_stats: BudgetStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBudget {
    pub name: String,
    pub description: String,
    pub default_interest_rate: InterestRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Active,
    Paid,
    Paused,
    Completed,
    Defaulted,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Paid => "PAID",
            LoanStatus::Paused => "PAUSED",
            LoanStatus::Completed => "COMPLETED",
            LoanStatus::Defaulted => "DEFAULTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LoanStatus::Completed | LoanStatus::Defaulted)
    }
}

impl FromStr for LoanStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(LoanStatus::Active),
            "PAID" => Ok(LoanStatus::Paid),
            "PAUSED" => Ok(LoanStatus::Paused),
            "COMPLETED" => Ok(LoanStatus::Completed),
            "DEFAULTED" => Ok(LoanStatus::Defaulted),
            other => Err(LedgerError::validation(format!(
                "unknown loan status '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentFrequency {
    Daily,
    Weekly,
    Biweekly,
    Monthly,
    Yearly,
}

impl PaymentFrequency {
    pub fn days(&self) -> i64 {
        match self {
            PaymentFrequency::Daily => 1,
            PaymentFrequency::Weekly => 7,
            PaymentFrequency::Biweekly => 14,
            PaymentFrequency::Monthly => 30,
            PaymentFrequency::Yearly => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentFrequency::Daily => "DAILY",
            PaymentFrequency::Weekly => "WEEKLY",
            PaymentFrequency::Biweekly => "BIWEEKLY",
            PaymentFrequency::Monthly => "MONTHLY",
            PaymentFrequency::Yearly => "YEARLY",
        }
    }
}

impl FromStr for PaymentFrequency {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(PaymentFrequency::Daily),
            "WEEKLY" => Ok(PaymentFrequency::Weekly),
            "BIWEEKLY" => Ok(PaymentFrequency::Biweekly),
            "MONTHLY" => Ok(PaymentFrequency::Monthly),
            "YEARLY" => Ok(PaymentFrequency::Yearly),
            other => Err(LedgerError::validation(format!(
                "unknown payment frequency '{}'",
                other
            ))),
        }
    }
}

/// Per-budget investment breakdown on a loan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelatedBudget {
    pub invested: Decimal,
    pub withdrawn: Decimal,
}

/// Derived loan fields, always reproducible by replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoanSummary {
    pub invested: Decimal,
    pub outstanding_principal: Decimal,
    pub paid_principal: Decimal,
    pub outstanding_interest: Decimal,
    pub paid_interest: Decimal,
    pub outstanding_fees: Decimal,
    pub paid_fees: Decimal,
    pub forgiven_principal: Decimal,
    pub forgiven_interest: Decimal,
    pub forgiven_fees: Decimal,
    pub last_transaction_timestamp: Option<i64>,
    pub calculated_related_budgets: BTreeMap<i64, RelatedBudget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub customer_id: Option<String>,
    pub opened_timestamp: i64,
    pub closes_timestamp: i64,
    pub payment_frequency: PaymentFrequency,
    pub notes: String,
    pub status: LoanStatus,
    pub interest_rate: InterestRate,
    pub summary: LoanSummary,
    /// Values frozen when the loan was defaulted.
    pub defaulted_snapshot: Option<LoanSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLoan {
    pub name: String,
    pub customer_id: Option<String>,
    pub opened_timestamp: i64,
    pub closes_timestamp: i64,
    pub payment_frequency: PaymentFrequency,
    pub notes: String,
    pub interest_rate: InterestRate,
}
