// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! Row mapping between the SQLite tables and the domain models.
//!
//! Functions take a plain `&Connection`, so they work equally on a
//! connection or inside an open `rusqlite::Transaction`.

use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Address, AddressKind, Budget, BudgetStats, InterestRate, Loan, LoanStatus, LoanSummary,
    NewBudget, NewLoan, PaymentFrequency, Transaction, TransactionVersion,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: usize,
}

impl Page {
    pub const ALL: Page = Page {
        limit: None,
        offset: 0,
    };

    pub fn first(n: usize) -> Self {
        Page {
            limit: Some(n),
            offset: 0,
        }
    }

    fn sql_limit(&self) -> i64 {
        self.limit.map(|l| l as i64).unwrap_or(-1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateOwner {
    Budget,
    Loan,
}

impl RateOwner {
    fn as_str(&self) -> &'static str {
        match self {
            RateOwner::Budget => "BUDGET",
            RateOwner::Loan => "LOAN",
        }
    }
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn decimal_at(row: &Row, idx: usize) -> rusqlite::Result<Decimal> {
    let s: String = row.get(idx)?;
    s.parse::<Decimal>().map_err(|e| conversion(idx, e))
}

fn json_at<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let s: String = row.get(idx)?;
    serde_json::from_str(&s).map_err(|e| conversion(idx, e))
}

fn opt_json_at<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| serde_json::from_str(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

fn parsed_at<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = LedgerError>,
{
    let s: String = row.get(idx)?;
    s.parse::<T>().map_err(|e| conversion(idx, e))
}

fn to_json<T: Serialize>(v: &T) -> LedgerResult<String> {
    Ok(serde_json::to_string(v)?)
}

// ---- transactions ----

const TX_COLUMNS: &str = "id, owner, transaction_ts, entry_ts, description, amount, \
     from_kind, from_id, to_kind, to_id, rate_json, version";

fn transaction_from_row(r: &Row) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: r.get(0)?,
        owner: r.get(1)?,
        transaction_timestamp: r.get(2)?,
        entry_timestamp: r.get(3)?,
        description: r.get(4)?,
        amount: decimal_at(r, 5)?,
        from: Address {
            kind: parsed_at::<AddressKind>(r, 6)?,
            id: r.get(7)?,
        },
        to: Address {
            kind: parsed_at::<AddressKind>(r, 8)?,
            id: r.get(9)?,
        },
        interest_rate: opt_json_at(r, 10)?,
        version: r.get(11)?,
    })
}

/// Inserts `t` (its id is ignored) and returns the new id.
pub fn insert_transaction(conn: &Connection, t: &Transaction) -> LedgerResult<i64> {
    let rate = t.interest_rate.as_ref().map(to_json).transpose()?;
    conn.execute(
        "INSERT INTO transactions(owner, transaction_ts, entry_ts, description, amount,
            from_kind, from_id, to_kind, to_id, rate_json, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            t.owner,
            t.transaction_timestamp,
            t.entry_timestamp,
            t.description,
            t.amount.to_string(),
            t.from.kind.as_str(),
            t.from.id,
            t.to.kind.as_str(),
            t.to.id,
            rate,
            t.version,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Rewrites the mutable fields of a stored transaction.
pub fn update_transaction(conn: &Connection, t: &Transaction) -> LedgerResult<()> {
    let n = conn.execute(
        "UPDATE transactions SET transaction_ts=?1, description=?2, amount=?3, version=?4
         WHERE id=?5 AND owner=?6",
        params![
            t.transaction_timestamp,
            t.description,
            t.amount.to_string(),
            t.version,
            t.id,
            t.owner
        ],
    )?;
    if n == 0 {
        return Err(LedgerError::NotFound {
            kind: "transaction",
            id: t.id,
        });
    }
    Ok(())
}

pub fn get_transaction(conn: &Connection, owner: &str, id: i64) -> LedgerResult<Transaction> {
    let sql = format!("SELECT {} FROM transactions WHERE id=?1 AND owner=?2", TX_COLUMNS);
    conn.query_row(&sql, params![id, owner], transaction_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound {
            kind: "transaction",
            id,
        })
}

/// Transactions on either side of `address`, newest first.
pub fn transactions_touching(
    conn: &Connection,
    owner: &str,
    address: &Address,
    page: Page,
) -> LedgerResult<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions
         WHERE owner=?1 AND ((from_kind=?2 AND from_id IS ?3) OR (to_kind=?2 AND to_id IS ?3))
         ORDER BY transaction_ts DESC, entry_ts DESC, id DESC
         LIMIT ?4 OFFSET ?5",
        TX_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![
            owner,
            address.kind.as_str(),
            address.id,
            page.sql_limit(),
            page.offset as i64
        ],
        transaction_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Every transaction of `owner`, newest first.
pub fn list_transactions(conn: &Connection, owner: &str, page: Page) -> LedgerResult<Vec<Transaction>> {
    let sql = format!(
        "SELECT {} FROM transactions WHERE owner=?1
         ORDER BY transaction_ts DESC, entry_ts DESC, id DESC
         LIMIT ?2 OFFSET ?3",
        TX_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        params![owner, page.sql_limit(), page.offset as i64],
        transaction_from_row,
    )?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn archive_transaction_version(
    conn: &Connection,
    previous: &Transaction,
    archived_at: i64,
) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO transaction_versions(transaction_id, version, archived_at, snapshot_json)
         VALUES (?1, ?2, ?3, ?4)",
        params![previous.id, previous.version, archived_at, to_json(previous)?],
    )?;
    Ok(())
}

/// Archived versions of a transaction, oldest first.
pub fn transaction_versions(
    conn: &Connection,
    owner: &str,
    id: i64,
) -> LedgerResult<Vec<TransactionVersion>> {
    // Ownership check doubles as the not-found error.
    get_transaction(conn, owner, id)?;
    let mut stmt = conn.prepare(
        "SELECT transaction_id, version, archived_at, snapshot_json FROM transaction_versions
         WHERE transaction_id=?1 ORDER BY version",
    )?;
    let rows = stmt.query_map(params![id], |r| {
        Ok(TransactionVersion {
            transaction_id: r.get(0)?,
            version: r.get(1)?,
            archived_at: r.get(2)?,
            snapshot: json_at(r, 3)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Loans `budget_id` has funded.
pub fn loan_ids_for_budget(conn: &Connection, owner: &str, budget_id: i64) -> LedgerResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT to_id FROM transactions
         WHERE owner=?1 AND from_kind='BUDGET' AND from_id=?2 AND to_kind='LOAN'
         ORDER BY to_id",
    )?;
    let rows = stmt.query_map(params![owner, budget_id], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

/// Budgets that funded `loan_id`.
pub fn budget_ids_for_loan(conn: &Connection, owner: &str, loan_id: i64) -> LedgerResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT DISTINCT from_id FROM transactions
         WHERE owner=?1 AND from_kind='BUDGET' AND to_kind='LOAN' AND to_id=?2
         ORDER BY from_id",
    )?;
    let rows = stmt.query_map(params![owner, loan_id], |r| r.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<i64>>>()?)
}

// ---- budgets ----

const BUDGET_COLUMNS: &str = "id, owner, name, description, rate_json, is_archived, stats_json";

fn budget_from_row(r: &Row) -> rusqlite::Result<Budget> {
    Ok(Budget {
        id: r.get(0)?,
        owner: r.get(1)?,
        name: r.get(2)?,
        description: r.get(3)?,
        default_interest_rate: json_at(r, 4)?,
        is_archived: r.get(5)?,
        current_stats: json_at(r, 6)?,
    })
}

pub fn insert_budget(conn: &Connection, owner: &str, new: &NewBudget) -> LedgerResult<i64> {
    conn.execute(
        "INSERT INTO budgets(owner, name, description, rate_json, stats_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            owner,
            new.name,
            new.description,
            to_json(&new.default_interest_rate)?,
            to_json(&BudgetStats::default())?
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_budget(conn: &Connection, owner: &str, id: i64) -> LedgerResult<Budget> {
    let sql = format!("SELECT {} FROM budgets WHERE id=?1 AND owner=?2", BUDGET_COLUMNS);
    conn.query_row(&sql, params![id, owner], budget_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { kind: "budget", id })
}

pub fn list_budgets(conn: &Connection, owner: &str) -> LedgerResult<Vec<Budget>> {
    let sql = format!("SELECT {} FROM budgets WHERE owner=?1 ORDER BY id", BUDGET_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner], budget_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn save_budget_stats(conn: &Connection, id: i64, stats: &BudgetStats) -> LedgerResult<()> {
    conn.execute(
        "UPDATE budgets SET stats_json=?1 WHERE id=?2",
        params![to_json(stats)?, id],
    )?;
    Ok(())
}

pub fn set_budget_archived(conn: &Connection, id: i64, archived: bool) -> LedgerResult<()> {
    conn.execute(
        "UPDATE budgets SET is_archived=?1 WHERE id=?2",
        params![archived, id],
    )?;
    Ok(())
}

pub fn update_budget_rate(conn: &Connection, id: i64, rate: &InterestRate) -> LedgerResult<()> {
    conn.execute(
        "UPDATE budgets SET rate_json=?1 WHERE id=?2",
        params![to_json(rate)?, id],
    )?;
    Ok(())
}

// ---- loans ----

const LOAN_COLUMNS: &str = "id, owner, name, customer_id, opened_ts, closes_ts, payment_frequency, \
     notes, status, rate_json, derived_json, defaulted_json";

fn loan_from_row(r: &Row) -> rusqlite::Result<Loan> {
    Ok(Loan {
        id: r.get(0)?,
        owner: r.get(1)?,
        name: r.get(2)?,
        customer_id: r.get(3)?,
        opened_timestamp: r.get(4)?,
        closes_timestamp: r.get(5)?,
        payment_frequency: parsed_at::<PaymentFrequency>(r, 6)?,
        notes: r.get(7)?,
        status: parsed_at::<LoanStatus>(r, 8)?,
        interest_rate: json_at(r, 9)?,
        summary: json_at(r, 10)?,
        defaulted_snapshot: opt_json_at(r, 11)?,
    })
}

pub fn insert_loan(conn: &Connection, owner: &str, new: &NewLoan) -> LedgerResult<i64> {
    conn.execute(
        "INSERT INTO loans(owner, name, customer_id, opened_ts, closes_ts, payment_frequency,
            notes, status, rate_json, derived_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            owner,
            new.name,
            new.customer_id,
            new.opened_timestamp,
            new.closes_timestamp,
            new.payment_frequency.as_str(),
            new.notes,
            LoanStatus::Active.as_str(),
            to_json(&new.interest_rate)?,
            to_json(&LoanSummary::default())?
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_loan(conn: &Connection, owner: &str, id: i64) -> LedgerResult<Loan> {
    let sql = format!("SELECT {} FROM loans WHERE id=?1 AND owner=?2", LOAN_COLUMNS);
    conn.query_row(&sql, params![id, owner], loan_from_row)
        .optional()?
        .ok_or(LedgerError::NotFound { kind: "loan", id })
}

pub fn list_loans(conn: &Connection, owner: &str) -> LedgerResult<Vec<Loan>> {
    let sql = format!("SELECT {} FROM loans WHERE owner=?1 ORDER BY id", LOAN_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![owner], loan_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Stores a fresh replay result and the status it implies.
pub fn save_loan_derived(
    conn: &Connection,
    id: i64,
    status: LoanStatus,
    summary: &LoanSummary,
    derived_at: i64,
) -> LedgerResult<()> {
    conn.execute(
        "UPDATE loans SET status=?1, derived_json=?2, derived_at=?3 WHERE id=?4",
        params![status.as_str(), to_json(summary)?, derived_at, id],
    )?;
    Ok(())
}

/// Horizon the stored derived fields were computed for.
pub fn loan_derived_at(conn: &Connection, id: i64) -> LedgerResult<i64> {
    Ok(conn.query_row(
        "SELECT derived_at FROM loans WHERE id=?1",
        params![id],
        |r| r.get(0),
    )?)
}

pub fn save_loan_status(
    conn: &Connection,
    id: i64,
    status: LoanStatus,
    defaulted: Option<&LoanSummary>,
) -> LedgerResult<()> {
    let snapshot = defaulted.map(to_json).transpose()?;
    conn.execute(
        "UPDATE loans SET status=?1, defaulted_json=COALESCE(?2, defaulted_json) WHERE id=?3",
        params![status.as_str(), snapshot, id],
    )?;
    Ok(())
}

pub fn update_loan_rate(conn: &Connection, id: i64, rate: &InterestRate) -> LedgerResult<()> {
    conn.execute(
        "UPDATE loans SET rate_json=?1 WHERE id=?2",
        params![to_json(rate)?, id],
    )?;
    Ok(())
}

// ---- rate history ----

pub fn archive_rate(
    conn: &Connection,
    owner: RateOwner,
    entity_id: i64,
    rate: &InterestRate,
    superseded_at: i64,
) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO rate_versions(entity_kind, entity_id, version, rate_json, superseded_at)
         VALUES (?1, ?2,
            (SELECT COALESCE(MAX(version), 0) + 1 FROM rate_versions WHERE entity_kind=?1 AND entity_id=?2),
            ?3, ?4)",
        params![owner.as_str(), entity_id, to_json(rate)?, superseded_at],
    )?;
    Ok(())
}

/// Superseded rates, oldest first.
pub fn rate_history(conn: &Connection, owner: RateOwner, entity_id: i64) -> LedgerResult<Vec<InterestRate>> {
    let mut stmt = conn.prepare(
        "SELECT rate_json FROM rate_versions WHERE entity_kind=?1 AND entity_id=?2 ORDER BY version",
    )?;
    let rows = stmt.query_map(params![owner.as_str(), entity_id], |r| json_at(r, 0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}
