// Copyright (c) AlphaVelocity.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use std::str::FromStr;
use std::sync::Arc;

use loanclip::cache::ManualClock;
use loanclip::models::{
    Address, DAY_MS, InterestRate, NewBudget, NewLoan, NewTransaction, PaymentFrequency,
};
use loanclip::service::Ledger;
use loanclip::{cli, commands::transactions, db};
use rusqlite::Connection;
use rust_decimal::Decimal;

const T0: i64 = 1_735_689_600_000;

fn setup() -> Ledger {
    let conn = Connection::open_in_memory().unwrap();
    db::init_schema(&conn).unwrap();
    let mut ledger = Ledger::new(conn, Arc::new(ManualClock::new(T0 + 5 * DAY_MS)), 30_000);
    ledger
        .create_budget(
            "local",
            NewBudget {
                name: "B1".into(),
                description: String::new(),
                default_interest_rate: InterestRate::zero(T0),
            },
        )
        .unwrap();
    ledger
        .create_loan(
            "local",
            NewLoan {
                name: "L1".into(),
                customer_id: None,
                opened_timestamp: T0,
                closes_timestamp: T0 + 30 * DAY_MS,
                payment_frequency: PaymentFrequency::Weekly,
                notes: String::new(),
                interest_rate: InterestRate::zero(T0),
            },
        )
        .unwrap();
    let moves = [
        (0, "500", Address::outside(), Address::budget(1)),
        (1, "200", Address::budget(1), Address::loan(1)),
        (2, "20", Address::loan(1), Address::budget(1)),
        (3, "30", Address::loan(1), Address::budget(1)),
    ];
    for (day, amount, from, to) in moves {
        ledger
            .propose_transaction(
                "local",
                NewTransaction {
                    transaction_timestamp: T0 + day * DAY_MS,
                    description: format!("day {}", day),
                    amount: Decimal::from_str(amount).unwrap(),
                    from,
                    to,
                    interest_rate: None,
                },
            )
            .unwrap();
    }
    ledger
}

#[test]
fn list_limit_respected() {
    let ledger = setup();
    let cli = cli::build_cli();
    let matches = cli.get_matches_from(["loanclip", "tx", "list", "--limit", "2"]);
    if let Some(("tx", tx_m)) = matches.subcommand() {
        if let Some(("list", list_m)) = tx_m.subcommand() {
            let rows = transactions::query_rows(&ledger, "local", list_m).unwrap();
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].date, "2025-01-04 00:00");
            assert_eq!(rows[0].kind, "payment");
        } else {
            panic!("no list subcommand");
        }
    } else {
        panic!("no tx subcommand");
    }
}

#[test]
fn list_filters_by_loan_newest_first() {
    let ledger = setup();
    let matches = cli::build_cli().get_matches_from(["loanclip", "tx", "list", "--loan", "1"]);
    let (_, tx_m) = matches.subcommand().unwrap();
    let (_, list_m) = tx_m.subcommand().unwrap();
    let rows = transactions::query_rows(&ledger, "local", list_m).unwrap();
    let kinds: Vec<&str> = rows.iter().map(|r| r.kind.as_str()).collect();
    assert_eq!(kinds, vec!["payment", "payment", "funding"]);
    assert_eq!(rows[2].from, "BUDGET:1");
    assert_eq!(rows[2].to, "LOAN:1");
    assert_eq!(rows[2].amount, "200.00");
}

#[test]
fn budget_and_loan_filters_conflict() {
    let res = cli::build_cli().try_get_matches_from([
        "loanclip", "tx", "list", "--loan", "1", "--budget", "1",
    ]);
    assert!(res.is_err());
}

#[test]
fn funding_row_stores_budget_rate_snapshot() {
    let ledger = setup();
    let funding = ledger
        .list_transactions("local", Some(&Address::loan(1)), loanclip::store::Page::ALL)
        .unwrap()
        .into_iter()
        .find(|t| t.from == Address::budget(1))
        .unwrap();
    assert_eq!(funding.interest_rate, Some(InterestRate::zero(T0)));
}
