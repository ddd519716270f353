// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use std::str::FromStr;
use std::sync::Arc;

use loanclip::cache::ManualClock;
use loanclip::db;
use loanclip::engine::arith::round2;
use loanclip::error::{LedgerError, Rule};
use loanclip::models::{
    Address, AddressKind, DAY_MS, InterestRate, LoanStatus, NewBudget, NewLoan, NewTransaction,
    PaymentFrequency, RateDuration, RateType, TransactionEdit,
};
use loanclip::service::Ledger;
use loanclip::store::Page;
use rusqlite::Connection;
use rust_decimal::Decimal;

const T0: i64 = 1_735_689_600_000; // 2025-01-01
const OWNER: &str = "local";

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn ledger_at(now: i64) -> (Ledger, Arc<ManualClock>) {
    let conn = Connection::open_in_memory().unwrap();
    db::init_schema(&conn).unwrap();
    let clock = Arc::new(ManualClock::new(now));
    (Ledger::new(conn, clock.clone(), 30_000), clock)
}

fn monthly(pct: &str, at: i64) -> InterestRate {
    InterestRate {
        rate_type: RateType::PercentagePerDuration,
        duration: RateDuration::Month,
        amount: d(pct),
        is_compounding: false,
        entry_timestamp: at,
    }
}

fn propose(
    ledger: &mut Ledger,
    at: i64,
    amount: &str,
    from: Address,
    to: Address,
) -> Result<i64, LedgerError> {
    ledger
        .propose_transaction(
            OWNER,
            NewTransaction {
                transaction_timestamp: at,
                description: String::new(),
                amount: d(amount),
                from,
                to,
                interest_rate: None,
            },
        )
        .map(|t| t.id)
}

fn move_money(ledger: &mut Ledger, at: i64, amount: &str, from: Address, to: Address) -> i64 {
    propose(ledger, at, amount, from, to).unwrap()
}

/// Budget 1 holding 1000, loan 1 at `loan_rate` opened at T0, funded with 100.
fn funded_loan(ledger: &mut Ledger, loan_rate: InterestRate) {
    ledger
        .create_budget(
            OWNER,
            NewBudget {
                name: "Main".into(),
                description: String::new(),
                default_interest_rate: InterestRate::zero(T0),
            },
        )
        .unwrap();
    ledger
        .create_loan(
            OWNER,
            NewLoan {
                name: "Bike".into(),
                customer_id: Some("cust-1".into()),
                opened_timestamp: T0,
                closes_timestamp: T0 + 365 * DAY_MS,
                payment_frequency: PaymentFrequency::Monthly,
                notes: String::new(),
                interest_rate: loan_rate,
            },
        )
        .unwrap();
    move_money(ledger, T0, "1000", Address::outside(), Address::budget(1));
    move_money(ledger, T0, "100", Address::budget(1), Address::loan(1));
}

/// Budgets 1 and 2 lend 600 and 400 to an interest-free loan 1 at T0.
fn shared_loan(ledger: &mut Ledger) {
    for name in ["Main", "Side"] {
        ledger
            .create_budget(
                OWNER,
                NewBudget {
                    name: name.into(),
                    description: String::new(),
                    default_interest_rate: InterestRate::zero(T0),
                },
            )
            .unwrap();
    }
    ledger
        .create_loan(
            OWNER,
            NewLoan {
                name: "Van".into(),
                customer_id: None,
                opened_timestamp: T0,
                closes_timestamp: T0 + 180 * DAY_MS,
                payment_frequency: PaymentFrequency::Monthly,
                notes: String::new(),
                interest_rate: InterestRate::zero(T0),
            },
        )
        .unwrap();
    for (budget, amount) in [(1, "600"), (2, "400")] {
        move_money(ledger, T0, "1000", Address::outside(), Address::budget(budget));
        move_money(ledger, T0, amount, Address::budget(budget), Address::loan(1));
    }
}

fn forgiveness(target: Option<i64>) -> Address {
    Address::synthetic(AddressKind::Forgiveness, target)
}

#[test]
fn interest_is_paid_before_principal_and_flows_to_budget() {
    let (mut ledger, _) = ledger_at(T0 + 30 * DAY_MS);
    funded_loan(&mut ledger, monthly("10", T0));
    move_money(&mut ledger, T0 + 30 * DAY_MS, "50", Address::loan(1), Address::budget(1));

    let view = ledger.recalculate_loan(OWNER, 1).unwrap();
    let s = &view.loan.summary;
    assert_eq!(round2(s.paid_interest), d("10.00"));
    assert_eq!(round2(s.paid_principal), d("40.00"));
    assert_eq!(round2(s.outstanding_principal), d("60.00"));
    assert_eq!(view.loan.status, LoanStatus::Active);

    let budget = ledger.recalculate_budget(OWNER, 1).unwrap().budget;
    let stats = &budget.current_stats;
    assert_eq!(stats.invested, d("1000"));
    assert_eq!(stats.total_lent, d("100"));
    assert_eq!(stats.currently_lent, d("50"));
    assert_eq!(stats.available, d("950"));
    assert_eq!(round2(stats.earned_interest), d("10.00"));
    assert_eq!(round2(stats.paid_back_principal), d("40.00"));
    assert_eq!(stats.live_loan_count, 1);
}

#[test]
fn paying_off_flips_to_paid_then_completion_closes_the_loan() {
    let (mut ledger, _) = ledger_at(T0 + 30 * DAY_MS);
    funded_loan(&mut ledger, monthly("10", T0));
    move_money(&mut ledger, T0 + 30 * DAY_MS, "50", Address::loan(1), Address::budget(1));
    move_money(&mut ledger, T0 + 30 * DAY_MS, "60", Address::loan(1), Address::budget(1));

    assert_eq!(ledger.get_loan(OWNER, 1).unwrap().status, LoanStatus::Paid);
    let err = ledger
        .change_loan_status(OWNER, 1, LoanStatus::Paid)
        .unwrap_err();
    assert!(matches!(err, LedgerError::Lifecycle(_)));

    let loan = ledger
        .change_loan_status(OWNER, 1, LoanStatus::Completed)
        .unwrap();
    assert_eq!(loan.status, LoanStatus::Completed);

    let err = ledger
        .propose_transaction(
            OWNER,
            NewTransaction {
                transaction_timestamp: T0 + 30 * DAY_MS,
                description: "late".into(),
                amount: d("1"),
                from: Address::loan(1),
                to: Address::budget(1),
                interest_rate: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::LoanClosed));
    assert_eq!(
        ledger.recalculate_budget(OWNER, 1).unwrap().budget.current_stats.live_loan_count,
        0
    );
}

#[test]
fn overpayment_is_rejected_and_leaves_no_trace() {
    let (mut ledger, _) = ledger_at(T0 + DAY_MS);
    funded_loan(&mut ledger, InterestRate::zero(T0));
    let before = ledger.list_transactions(OWNER, None, Page::ALL);
    let err = ledger
        .propose_transaction(
            OWNER,
            NewTransaction {
                transaction_timestamp: T0 + DAY_MS,
                description: String::new(),
                amount: d("100.01"),
                from: Address::loan(1),
                to: Address::budget(1),
                interest_rate: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::LoanOverpayment));
    let after = ledger.list_transactions(OWNER, None, Page::ALL);
    assert_eq!(before.unwrap().len(), after.unwrap().len());
    assert_eq!(
        ledger.get_loan(OWNER, 1).unwrap().summary.outstanding_principal,
        d("100")
    );
}

#[test]
fn transactions_before_the_loan_opens_are_rejected() {
    let (mut ledger, _) = ledger_at(T0 + DAY_MS);
    funded_loan(&mut ledger, InterestRate::zero(T0));
    let err = ledger
        .propose_transaction(
            OWNER,
            NewTransaction {
                transaction_timestamp: T0 - DAY_MS,
                description: String::new(),
                amount: d("5"),
                from: Address::loan(1),
                to: Address::budget(1),
                interest_rate: None,
            },
        )
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::LoanWindow));
}

#[test]
fn editing_a_payment_archives_the_previous_version() {
    let (mut ledger, _) = ledger_at(T0 + 30 * DAY_MS);
    funded_loan(&mut ledger, monthly("10", T0));
    let id = move_money(&mut ledger, T0 + 30 * DAY_MS, "50", Address::loan(1), Address::budget(1));

    let edited = ledger
        .edit_transaction(
            OWNER,
            id,
            TransactionEdit {
                amount: Some(d("30")),
                ..TransactionEdit::default()
            },
        )
        .unwrap();
    assert_eq!(edited.version, 2);
    let history = ledger.transaction_history(OWNER, id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[0].snapshot.amount, d("50"));

    let loan = ledger.recalculate_loan(OWNER, 1).unwrap().loan;
    assert_eq!(round2(loan.summary.paid_principal), d("20.00"));
    assert_eq!(round2(loan.summary.outstanding_principal), d("80.00"));
}

#[test]
fn an_edit_that_would_overpay_is_rolled_back() {
    let (mut ledger, _) = ledger_at(T0 + DAY_MS);
    funded_loan(&mut ledger, InterestRate::zero(T0));
    let id = move_money(&mut ledger, T0 + DAY_MS, "40", Address::loan(1), Address::budget(1));
    let err = ledger
        .edit_transaction(
            OWNER,
            id,
            TransactionEdit {
                amount: Some(d("250")),
                ..TransactionEdit::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::LoanOverpayment));
    let stored = ledger.get_transaction(OWNER, id).unwrap();
    assert_eq!(stored.amount, d("40"));
    assert_eq!(stored.version, 1);
    assert!(ledger.transaction_history(OWNER, id).unwrap().is_empty());

    let noop = ledger.edit_transaction(OWNER, id, TransactionEdit::default());
    assert!(matches!(noop, Err(LedgerError::Validation(_))));
}

#[test]
fn funding_snapshots_the_budget_default_rate() {
    let (mut ledger, _) = ledger_at(T0 + 30 * DAY_MS);
    ledger
        .create_budget(
            OWNER,
            NewBudget {
                name: "Yield".into(),
                description: String::new(),
                default_interest_rate: monthly("5", T0),
            },
        )
        .unwrap();
    ledger
        .create_loan(
            OWNER,
            NewLoan {
                name: "Laptop".into(),
                customer_id: None,
                opened_timestamp: T0,
                closes_timestamp: T0 + 90 * DAY_MS,
                payment_frequency: PaymentFrequency::Monthly,
                notes: String::new(),
                interest_rate: InterestRate::zero(T0),
            },
        )
        .unwrap();
    move_money(&mut ledger, T0, "1000", Address::outside(), Address::budget(1));
    let funding = move_money(&mut ledger, T0, "100", Address::budget(1), Address::loan(1));

    let stored = ledger.get_transaction(OWNER, funding).unwrap();
    assert_eq!(stored.interest_rate, Some(monthly("5", T0)));
    let view = ledger.recalculate_loan(OWNER, 1).unwrap();
    assert_eq!(round2(view.loan.summary.outstanding_interest), d("5.00"));
    assert_eq!(view.shares.len(), 1);
}

#[test]
fn a_rate_change_only_governs_hours_after_it() {
    let (mut ledger, clock) = ledger_at(T0 + 30 * DAY_MS);
    funded_loan(&mut ledger, monthly("10", T0));

    let backdated = ledger.set_loan_rate(OWNER, 1, monthly("2", T0 - DAY_MS));
    assert!(matches!(backdated, Err(LedgerError::Validation(_))));

    ledger
        .set_loan_rate(OWNER, 1, InterestRate::zero(T0 + 30 * DAY_MS))
        .unwrap();
    clock.set(T0 + 60 * DAY_MS);
    let loan = ledger.recalculate_loan(OWNER, 1).unwrap().loan;
    assert_eq!(round2(loan.summary.outstanding_interest), d("10.00"));
}

#[test]
fn pause_resume_and_default() {
    let (mut ledger, _) = ledger_at(T0 + DAY_MS);
    funded_loan(&mut ledger, InterestRate::zero(T0));
    move_money(&mut ledger, T0 + DAY_MS, "30", Address::loan(1), Address::budget(1));

    let paused = ledger.change_loan_status(OWNER, 1, LoanStatus::Paused).unwrap();
    assert_eq!(paused.status, LoanStatus::Paused);
    let resumed = ledger.change_loan_status(OWNER, 1, LoanStatus::Active).unwrap();
    assert_eq!(resumed.status, LoanStatus::Active);
    let err = ledger.change_loan_status(OWNER, 1, LoanStatus::Completed).unwrap_err();
    assert!(matches!(err, LedgerError::Lifecycle(_)));

    let defaulted = ledger.change_loan_status(OWNER, 1, LoanStatus::Defaulted).unwrap();
    assert_eq!(defaulted.status, LoanStatus::Defaulted);
    let frozen = defaulted.defaulted_snapshot.unwrap();
    assert_eq!(frozen.outstanding_principal, d("70"));

    let stats = ledger.recalculate_budget(OWNER, 1).unwrap().budget.current_stats;
    assert_eq!(stats.defaulted_principal, d("70"));
    assert_eq!(stats.live_loan_count, 0);
    assert_eq!(stats.loan_count, 1);

    let err = ledger.change_loan_status(OWNER, 1, LoanStatus::Active).unwrap_err();
    assert!(matches!(err, LedgerError::Lifecycle(_)));
}

#[test]
fn cached_views_expire_and_writes_invalidate_them() {
    let (mut ledger, clock) = ledger_at(T0);
    funded_loan(&mut ledger, monthly("10", T0));
    let first = ledger.recalculate_loan(OWNER, 1).unwrap();
    assert_eq!(first.as_of, T0);

    clock.set(T0 + 10_000);
    assert_eq!(ledger.recalculate_loan(OWNER, 1).unwrap().as_of, T0);

    clock.set(T0 + 30 * DAY_MS);
    let later = ledger.recalculate_loan(OWNER, 1).unwrap();
    assert_eq!(later.as_of, T0 + 30 * DAY_MS);
    assert_eq!(round2(later.loan.summary.outstanding_interest), d("10.00"));

    move_money(&mut ledger, T0 + 30 * DAY_MS, "10", Address::loan(1), Address::budget(1));
    let after_payment = ledger.recalculate_loan(OWNER, 1).unwrap();
    assert_eq!(round2(after_payment.loan.summary.outstanding_interest), d("0.00"));
    assert_eq!(round2(after_payment.loan.summary.paid_interest), d("10.00"));
}

#[test]
fn doctor_finds_nothing_on_a_consistent_ledger() {
    let (mut ledger, _) = ledger_at(T0 + 30 * DAY_MS);
    funded_loan(&mut ledger, monthly("10", T0));
    move_money(&mut ledger, T0 + 30 * DAY_MS, "50", Address::loan(1), Address::budget(1));
    ledger.recalculate_budget(OWNER, 1).unwrap();
    assert!(ledger.diagnose(OWNER).unwrap().is_empty());
}

#[test]
fn owners_do_not_see_each_other() {
    let (mut ledger, _) = ledger_at(T0 + DAY_MS);
    funded_loan(&mut ledger, InterestRate::zero(T0));
    assert!(ledger.list_budgets("someone-else").unwrap().is_empty());
    assert!(matches!(
        ledger.get_loan("someone-else", 1),
        Err(LedgerError::NotFound { kind: "loan", id: 1 })
    ));
}

#[test]
fn a_payment_counts_only_for_the_budget_that_received_it() {
    let (mut ledger, _) = ledger_at(T0 + 2 * DAY_MS);
    shared_loan(&mut ledger);
    move_money(&mut ledger, T0 + DAY_MS, "100", Address::loan(1), Address::budget(1));

    let shares = ledger.recalculate_loan(OWNER, 1).unwrap().shares;
    for (id, received) in [(1, d("100")), (2, Decimal::ZERO)] {
        let share = shares.iter().find(|s| s.budget_id == id).unwrap();
        assert_eq!(share.withdrawn().unwrap(), received);
        let stats = ledger.recalculate_budget(OWNER, id).unwrap().budget.current_stats;
        assert_eq!(
            stats.paid_back_principal + stats.earned_interest + stats.earned_fees,
            received
        );
        assert_eq!(stats.currently_lent, share.outstanding_principal);
    }

    ledger
        .create_budget(
            OWNER,
            NewBudget {
                name: "Idle".into(),
                description: String::new(),
                default_interest_rate: InterestRate::zero(T0),
            },
        )
        .unwrap();
    let err = propose(&mut ledger, T0 + DAY_MS, "10", Address::loan(1), Address::budget(3))
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::Unfunded));
}

#[test]
fn forgiveness_is_split_or_targeted_and_capped_at_what_is_owed() {
    let (mut ledger, _) = ledger_at(T0 + 2 * DAY_MS);
    shared_loan(&mut ledger);

    let err = propose(&mut ledger, T0 + DAY_MS, "400.01", Address::loan(1), forgiveness(Some(2)))
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::ForgivenessLimit));
    move_money(&mut ledger, T0 + DAY_MS, "100", Address::loan(1), forgiveness(Some(2)));
    move_money(&mut ledger, T0 + DAY_MS, "90", Address::loan(1), forgiveness(None));

    let view = ledger.recalculate_loan(OWNER, 1).unwrap();
    assert_eq!(view.loan.summary.forgiven_principal, d("190"));
    assert_eq!(view.loan.summary.outstanding_principal, d("810"));
    let share = |id: i64| view.shares.iter().find(|s| s.budget_id == id).unwrap();
    assert_eq!(round2(share(1).forgiven_principal), d("60.00"));
    assert_eq!(round2(share(2).forgiven_principal), d("130.00"));

    let err = propose(&mut ledger, T0 + DAY_MS, "810.01", Address::loan(1), forgiveness(None))
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::ForgivenessLimit));
    let stats = ledger.recalculate_budget(OWNER, 2).unwrap().budget.current_stats;
    assert_eq!(round2(stats.forgiven_principal), d("130.00"));
}

#[test]
fn a_targeted_fee_is_owed_to_one_budget_and_paid_before_its_principal() {
    let (mut ledger, _) = ledger_at(T0 + 2 * DAY_MS);
    shared_loan(&mut ledger);
    let fee = Address::synthetic(AddressKind::Fee, Some(2));
    move_money(&mut ledger, T0 + DAY_MS, "5", fee, Address::loan(1));

    let view = ledger.recalculate_loan(OWNER, 1).unwrap();
    assert_eq!(view.loan.summary.outstanding_fees, d("5"));
    let share = |id: i64| view.shares.iter().find(|s| s.budget_id == id).unwrap();
    assert_eq!(share(1).outstanding_fees, Decimal::ZERO);
    assert_eq!(share(2).outstanding_fees, d("5"));

    move_money(&mut ledger, T0 + DAY_MS, "25", Address::loan(1), Address::budget(2));
    let stats = ledger.recalculate_budget(OWNER, 2).unwrap().budget.current_stats;
    assert_eq!(stats.earned_fees, d("5"));
    assert_eq!(stats.paid_back_principal, d("20"));
    let loan = ledger.recalculate_loan(OWNER, 1).unwrap().loan;
    assert_eq!(loan.summary.outstanding_fees, Decimal::ZERO);
}

#[test]
fn a_refund_reopens_paid_principal_up_to_what_was_paid() {
    let (mut ledger, _) = ledger_at(T0 + 2 * DAY_MS);
    shared_loan(&mut ledger);
    move_money(&mut ledger, T0 + DAY_MS, "100", Address::loan(1), Address::budget(1));

    let refund_from = |target| Address::synthetic(AddressKind::Outside, target);
    let err = propose(&mut ledger, T0 + DAY_MS, "0.01", refund_from(Some(2)), Address::loan(1))
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::RefundLimit));
    move_money(&mut ledger, T0 + DAY_MS, "30", refund_from(Some(1)), Address::loan(1));
    let err = propose(&mut ledger, T0 + DAY_MS, "70.01", refund_from(None), Address::loan(1))
        .unwrap_err();
    assert_eq!(err.rule(), Some(Rule::RefundLimit));

    let view = ledger.recalculate_loan(OWNER, 1).unwrap();
    assert_eq!(view.loan.summary.paid_principal, d("70"));
    assert_eq!(view.loan.summary.outstanding_principal, d("930"));
    let first = view.shares.iter().find(|s| s.budget_id == 1).unwrap();
    assert_eq!(first.outstanding_principal, d("530"));
}
