// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Checks a proposed transaction against every ledger rule before it is
//! written. All checks run on a simulated history, so nothing is persisted
//! until the proposal is known to be sound.

use rust_decimal::Decimal;

use crate::engine::arith;
use crate::engine::interest::RateSchedule;
use crate::engine::replay;
use crate::error::{LedgerError, LedgerResult, Rule};
use crate::models::{
    Address, Budget, Loan, Transaction, TransactionKind, validate_timestamp,
};

/// A budget together with its full transaction history.
pub struct BudgetLedger<'a> {
    pub budget: &'a Budget,
    pub history: &'a [Transaction],
}

/// A loan together with its rate schedule and full transaction history.
pub struct LoanLedger<'a> {
    pub loan: &'a Loan,
    pub rates: &'a RateSchedule,
    pub history: &'a [Transaction],
}

pub struct Proposal<'a> {
    pub candidate: &'a Transaction,
    /// Stored transaction the candidate replaces, when editing.
    pub exclude: Option<i64>,
    pub now: i64,
}

/// Field-level checks that need no history.
pub fn check_shape(t: &Transaction) -> LedgerResult<TransactionKind> {
    if t.amount.is_sign_negative() && !t.amount.is_zero() {
        return Err(LedgerError::validation("amount must be >= 0"));
    }
    // Bound the amount before it reaches any running total.
    arith::add(t.amount, Decimal::ZERO)?;
    validate_timestamp(t.transaction_timestamp, "transaction timestamp")?;
    validate_timestamp(t.entry_timestamp, "entry timestamp")?;
    let kind = t.kind()?;
    if let Some(rate) = &t.interest_rate {
        if kind != TransactionKind::Funding {
            return Err(LedgerError::validation(
                "only budget-to-loan fundings carry an interest rate",
            ));
        }
        rate.validate()?;
    }
    Ok(kind)
}

/// History with `exclude` removed and `candidate` inserted, newest first.
pub fn simulate_insertion(
    history: &[Transaction],
    candidate: &Transaction,
    exclude: Option<i64>,
) -> Vec<Transaction> {
    let mut simulated: Vec<Transaction> = history
        .iter()
        .filter(|t| Some(t.id) != exclude && t.id != candidate.id)
        .cloned()
        .collect();
    simulated.push(candidate.clone());
    simulated.sort_by(Transaction::newest_first);
    simulated
}

/// Walks the budget's balance forward; it may never dip below zero.
pub fn check_budget_solvency(budget_id: i64, simulated: &[Transaction]) -> LedgerResult<()> {
    let address = Address::budget(budget_id);
    let mut balance = Decimal::ZERO;
    for t in simulated.iter().rev() {
        if t.to == address {
            balance = arith::add(balance, t.amount)?;
        }
        if t.from == address {
            balance = arith::sub(balance, t.amount)?;
        }
        if arith::round2(balance) < Decimal::ZERO {
            return Err(LedgerError::violation(
                Rule::BudgetSolvency,
                Some(t.transaction_timestamp),
                format!(
                    "budget {} balance would drop to {}",
                    budget_id,
                    arith::round2(balance)
                ),
            ));
        }
    }
    Ok(())
}

pub fn check_loan_window(loan: &Loan, candidate: &Transaction) -> LedgerResult<()> {
    if candidate.transaction_timestamp < loan.opened_timestamp {
        return Err(LedgerError::violation(
            Rule::LoanWindow,
            Some(candidate.transaction_timestamp),
            format!("loan {} only opens later", loan.id),
        ));
    }
    Ok(())
}

pub fn check_loan_open(loan: &Loan) -> LedgerResult<()> {
    if loan.status.is_terminal() {
        return Err(LedgerError::violation(
            Rule::LoanClosed,
            None,
            format!("loan {} is {}", loan.id, loan.status.as_str()),
        ));
    }
    Ok(())
}

/// Replays the simulated loan history; no share's outstanding principal may go negative.
pub fn check_loan_overpayment(
    ledger: &LoanLedger<'_>,
    simulated: &[Transaction],
    horizon: i64,
) -> LedgerResult<()> {
    let replayed = replay::replay(ledger.loan.id, ledger.rates, simulated, horizon)?;
    if let Some(bad) = replayed.first_overpayment() {
        return Err(LedgerError::violation(
            Rule::LoanOverpayment,
            Some(bad.timestamp),
            format!(
                "loan {} principal owed to a budget would reach {}",
                ledger.loan.id,
                arith::round2(bad.lowest_share_principal)
            ),
        ));
    }
    Ok(())
}

/// Runs every rule for the entities the candidate touches.
pub fn validate(
    proposal: &Proposal<'_>,
    budgets: &[BudgetLedger<'_>],
    loans: &[LoanLedger<'_>],
) -> LedgerResult<()> {
    let candidate = proposal.candidate;
    check_shape(candidate)?;

    if let Some(from) = candidate.from.budget_id() {
        if let Some(ledger) = budgets.iter().find(|b| b.budget.id == from) {
            if ledger.budget.is_archived {
                return Err(LedgerError::Lifecycle(format!(
                    "budget {} is archived and cannot send money",
                    from
                )));
            }
        }
    }

    for ledger in budgets {
        let simulated = simulate_insertion(ledger.history, candidate, proposal.exclude);
        check_budget_solvency(ledger.budget.id, &simulated)?;
    }

    let horizon = proposal.now.max(candidate.transaction_timestamp);
    for ledger in loans {
        check_loan_open(ledger.loan)?;
        check_loan_window(ledger.loan, candidate)?;
        let simulated = simulate_insertion(ledger.history, candidate, proposal.exclude);
        check_loan_overpayment(ledger, &simulated, horizon)?;
    }
    log::debug!(
        "transaction {} -> {} for {} passed validation",
        candidate.from,
        candidate.to,
        candidate.amount
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        BudgetStats, DAY_MS, InterestRate, LoanStatus, LoanSummary, PaymentFrequency,
    };
    use std::str::FromStr;

    const T0: i64 = 1_735_689_600_000;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
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

    fn budget(id: i64, archived: bool) -> Budget {
        Budget {
            id,
            owner: "local".into(),
            name: format!("b{}", id),
            description: String::new(),
            default_interest_rate: InterestRate::zero(T0),
            is_archived: archived,
            current_stats: BudgetStats::default(),
        }
    }

    fn loan(status: LoanStatus) -> Loan {
        Loan {
            id: 1,
            owner: "local".into(),
            name: "loan".into(),
            customer_id: None,
            opened_timestamp: T0,
            closes_timestamp: T0 + 365 * DAY_MS,
            payment_frequency: PaymentFrequency::Monthly,
            notes: String::new(),
            status,
            interest_rate: InterestRate::zero(T0),
            summary: LoanSummary::default(),
            defaulted_snapshot: None,
        }
    }

    #[test]
    fn withdrawal_beyond_balance_is_rejected() {
        let history = vec![tx(1, T0, "1000", Address::outside(), Address::budget(1))];
        let b = budget(1, false);
        let candidate = tx(i64::MAX, T0 + DAY_MS, "1100", Address::budget(1), Address::outside());
        let err = validate(
            &Proposal { candidate: &candidate, exclude: None, now: T0 + DAY_MS },
            &[BudgetLedger { budget: &b, history: &history }],
            &[],
        )
        .unwrap_err();
        assert_eq!(err.rule(), Some(Rule::BudgetSolvency));
    }

    #[test]
    fn backdated_withdrawal_before_deposit_is_rejected() {
        let history = vec![tx(1, T0 + DAY_MS, "500", Address::outside(), Address::budget(1))];
        let candidate = tx(i64::MAX, T0, "100", Address::budget(1), Address::outside());
        let simulated = simulate_insertion(&history, &candidate, None);
        assert!(check_budget_solvency(1, &simulated).is_err());
    }

    #[test]
    fn edit_replaces_the_stored_version() {
        let history = vec![
            tx(1, T0, "100", Address::outside(), Address::budget(1)),
            tx(2, T0 + DAY_MS, "80", Address::budget(1), Address::outside()),
        ];
        let mut edited = history[1].clone();
        edited.amount = d("100");
        let simulated = simulate_insertion(&history, &edited, Some(2));
        assert_eq!(simulated.len(), 2);
        assert!(check_budget_solvency(1, &simulated).is_ok());
        edited.amount = d("100.01");
        let simulated = simulate_insertion(&history, &edited, Some(2));
        assert!(check_budget_solvency(1, &simulated).is_err());
    }

    #[test]
    fn archived_budget_cannot_fund() {
        let b = budget(1, true);
        let candidate = tx(i64::MAX, T0, "0", Address::budget(1), Address::outside());
        let err = validate(
            &Proposal { candidate: &candidate, exclude: None, now: T0 },
            &[BudgetLedger { budget: &b, history: &[] }],
            &[],
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::Lifecycle(_)));
    }

    #[test]
    fn loan_rules_reject_closed_and_early_transactions() {
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        let candidate = tx(i64::MAX, T0 - DAY_MS, "10", Address::budget(1), Address::loan(1));
        let open = loan(LoanStatus::Active);
        let err = validate(
            &Proposal { candidate: &candidate, exclude: None, now: T0 },
            &[],
            &[LoanLedger { loan: &open, rates: &schedule, history: &[] }],
        )
        .unwrap_err();
        assert_eq!(err.rule(), Some(Rule::LoanWindow));

        let closed = loan(LoanStatus::Completed);
        let on_time = tx(i64::MAX, T0, "10", Address::budget(1), Address::loan(1));
        let err = validate(
            &Proposal { candidate: &on_time, exclude: None, now: T0 },
            &[],
            &[LoanLedger { loan: &closed, rates: &schedule, history: &[] }],
        )
        .unwrap_err();
        assert_eq!(err.rule(), Some(Rule::LoanClosed));
    }

    #[test]
    fn overpaying_principal_is_rejected() {
        let schedule = RateSchedule::single(InterestRate::zero(T0));
        let history = vec![tx(1, T0, "100", Address::budget(1), Address::loan(1))];
        let open = loan(LoanStatus::Active);
        let candidate = tx(i64::MAX, T0 + DAY_MS, "100.5", Address::loan(1), Address::budget(1));
        let err = validate(
            &Proposal { candidate: &candidate, exclude: None, now: T0 + DAY_MS },
            &[],
            &[LoanLedger { loan: &open, rates: &schedule, history: &history }],
        )
        .unwrap_err();
        assert_eq!(err.rule(), Some(Rule::LoanOverpayment));
    }

    #[test]
    fn negative_amounts_and_stray_rates_fail_shape_checks() {
        let negative = tx(1, T0, "-1", Address::outside(), Address::budget(1));
        assert!(check_shape(&negative).is_err());
        let mut deposit = tx(1, T0, "1", Address::outside(), Address::budget(1));
        deposit.interest_rate = Some(InterestRate::zero(T0));
        assert!(check_shape(&deposit).is_err());
    }
}
