// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

//! The ledger facade: every write goes through one SQLite `BEGIN IMMEDIATE`
//! transaction that validates, persists and refreshes derived fields
//! together, so a rejected proposal leaves no trace.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rusqlite::{Connection, TransactionBehavior};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::engine::aggregate::{self, BalancePoint, LoanLink};
use crate::engine::allocation::BudgetShare;
use crate::engine::arith;
use crate::engine::interest::RateSchedule;
use crate::engine::lifecycle;
use crate::engine::replay::{self, IntervalSnapshot, LoanReplay};
use crate::engine::validator::{self, BudgetLedger, LoanLedger, Proposal};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Address, Budget, InterestRate, Loan, LoanStatus, NewBudget, NewLoan, NewTransaction,
    Transaction, TransactionEdit, TransactionVersion, validate_timestamp,
};
use crate::store::{self, Page, RateOwner};

pub const DEFAULT_CACHE_TTL_SECS: i64 = 30;

/// Id given to a proposal until it is stored; sorts after every real id.
const PROVISIONAL_ID: i64 = i64::MAX;

#[derive(Debug, Clone, Serialize)]
pub struct LoanView {
    pub loan: Loan,
    /// Newest first.
    pub intervals: Vec<IntervalSnapshot>,
    pub shares: Vec<BudgetShare>,
    pub as_of: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetView {
    pub budget: Budget,
    /// Oldest first.
    pub timeline: Vec<BalancePoint>,
    pub loan_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub kind: String,
    pub detail: String,
}

/// Entities whose derived fields a write invalidated.
#[derive(Debug, Default)]
struct Touched {
    loans: BTreeSet<i64>,
    budgets: BTreeSet<i64>,
}

pub struct Ledger {
    conn: Connection,
    clock: Arc<dyn Clock>,
    loans: TtlCache<(String, i64), LoanView>,
    budgets: TtlCache<(String, i64), BudgetView>,
}

impl Ledger {
    pub fn new(conn: Connection, clock: Arc<dyn Clock>, cache_ttl_ms: i64) -> Self {
        Self {
            conn,
            clock,
            loans: TtlCache::new(cache_ttl_ms),
            budgets: TtlCache::new(cache_ttl_ms),
        }
    }

    pub fn with_system_clock(conn: Connection) -> Self {
        Self::new(conn, Arc::new(SystemClock), DEFAULT_CACHE_TTL_SECS * 1000)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn now(&self) -> i64 {
        self.clock.now_ms()
    }

    // ---- budgets ----

    pub fn create_budget(&mut self, owner: &str, new: NewBudget) -> LedgerResult<Budget> {
        if new.name.trim().is_empty() {
            return Err(LedgerError::validation("budget name must not be empty"));
        }
        new.default_interest_rate.validate()?;
        self.write(owner, |conn, _| {
            let id = store::insert_budget(conn, owner, &new)?;
            log::info!("created budget {} '{}' for {}", id, new.name, owner);
            Ok((store::get_budget(conn, owner, id)?, Touched::default()))
        })
    }

    pub fn get_budget(&self, owner: &str, id: i64) -> LedgerResult<Budget> {
        store::get_budget(&self.conn, owner, id)
    }

    pub fn list_budgets(&self, owner: &str) -> LedgerResult<Vec<Budget>> {
        store::list_budgets(&self.conn, owner)
    }

    pub fn archive_budget(&mut self, owner: &str, id: i64) -> LedgerResult<Budget> {
        self.write(owner, |conn, _| {
            store::get_budget(conn, owner, id)?;
            store::set_budget_archived(conn, id, true)?;
            log::info!("archived budget {}", id);
            let mut touched = Touched::default();
            touched.budgets.insert(id);
            Ok((store::get_budget(conn, owner, id)?, touched))
        })
    }

    /// Replaces the default rate offered to new fundings. Existing fundings
    /// keep the snapshot taken when they were recorded.
    pub fn set_budget_rate(
        &mut self,
        owner: &str,
        id: i64,
        rate: InterestRate,
    ) -> LedgerResult<Budget> {
        rate.validate()?;
        self.write(owner, |conn, now| {
            let budget = store::get_budget(conn, owner, id)?;
            store::archive_rate(conn, RateOwner::Budget, id, &budget.default_interest_rate, now)?;
            store::update_budget_rate(conn, id, &rate)?;
            log::info!("budget {} default rate changed", id);
            Ok((store::get_budget(conn, owner, id)?, Touched::default()))
        })
    }

    /// Fresh statistics for a budget, persisted and memoized.
    pub fn recalculate_budget(&mut self, owner: &str, id: i64) -> LedgerResult<BudgetView> {
        let key = (owner.to_string(), id);
        if let Some(view) = self.budgets.get(&key, self.clock.now_ms()) {
            log::debug!("budget {} served from cache", id);
            return Ok(view);
        }
        let view = self.write(owner, |conn, now| {
            let mut rc = Recompute::new(conn, owner, now);
            Ok((rc.budget(id)?, Touched::default()))
        })?;
        self.budgets.insert(key, view.clone(), self.clock.now_ms());
        Ok(view)
    }

    // ---- loans ----

    pub fn create_loan(&mut self, owner: &str, new: NewLoan) -> LedgerResult<Loan> {
        if new.name.trim().is_empty() {
            return Err(LedgerError::validation("loan name must not be empty"));
        }
        validate_timestamp(new.opened_timestamp, "opened timestamp")?;
        validate_timestamp(new.closes_timestamp, "closes timestamp")?;
        if new.closes_timestamp <= new.opened_timestamp {
            return Err(LedgerError::validation("a loan must close after it opens"));
        }
        new.interest_rate.validate()?;
        self.write(owner, |conn, _| {
            let id = store::insert_loan(conn, owner, &new)?;
            log::info!("created loan {} '{}' for {}", id, new.name, owner);
            Ok((store::get_loan(conn, owner, id)?, Touched::default()))
        })
    }

    pub fn get_loan(&self, owner: &str, id: i64) -> LedgerResult<Loan> {
        store::get_loan(&self.conn, owner, id)
    }

    pub fn list_loans(&self, owner: &str) -> LedgerResult<Vec<Loan>> {
        store::list_loans(&self.conn, owner)
    }

    /// Starts a new rate version. The superseded rate keeps governing the
    /// hours before the new rate's entry timestamp.
    pub fn set_loan_rate(&mut self, owner: &str, id: i64, rate: InterestRate) -> LedgerResult<Loan> {
        rate.validate()?;
        self.write(owner, |conn, now| {
            let loan = store::get_loan(conn, owner, id)?;
            validator::check_loan_open(&loan)?;
            if rate.entry_timestamp < loan.interest_rate.entry_timestamp {
                return Err(LedgerError::validation(
                    "a new rate cannot take effect before the current one",
                ));
            }
            store::archive_rate(conn, RateOwner::Loan, id, &loan.interest_rate, now)?;
            store::update_loan_rate(conn, id, &rate)?;
            log::info!("loan {} rate changed", id);
            let touched = loan_touch(conn, owner, id)?;
            refresh(conn, owner, &touched, now)?;
            Ok((store::get_loan(conn, owner, id)?, touched))
        })
    }

    /// Replays the loan up to now, persists the result and memoizes it.
    pub fn recalculate_loan(&mut self, owner: &str, id: i64) -> LedgerResult<LoanView> {
        let key = (owner.to_string(), id);
        if let Some(view) = self.loans.get(&key, self.clock.now_ms()) {
            log::debug!("loan {} served from cache", id);
            return Ok(view);
        }
        let view = self.write(owner, |conn, now| {
            let mut rc = Recompute::new(conn, owner, now);
            Ok((rc.loan_view(id)?, Touched::default()))
        })?;
        self.loans.insert(key, view.clone(), self.clock.now_ms());
        Ok(view)
    }

    pub fn change_loan_status(
        &mut self,
        owner: &str,
        id: i64,
        target: LoanStatus,
    ) -> LedgerResult<Loan> {
        self.write(owner, |conn, now| {
            let (loan, replayed) = {
                let mut rc = Recompute::new(conn, owner, now);
                rc.loan(id)?.clone()
            };
            let next = lifecycle::transition(loan.status, target, &replayed.summary)?;
            let snapshot = (next == LoanStatus::Defaulted).then(|| replayed.summary.clone());
            store::save_loan_status(conn, id, next, snapshot.as_ref())?;
            log::info!(
                "loan {} status {} -> {}",
                id,
                loan.status.as_str(),
                next.as_str()
            );
            let touched = loan_touch(conn, owner, id)?;
            refresh(conn, owner, &touched, now)?;
            Ok((store::get_loan(conn, owner, id)?, touched))
        })
    }

    // ---- transactions ----

    /// Validates and records one transaction, refreshing every affected
    /// loan and budget in the same commit.
    pub fn propose_transaction(
        &mut self,
        owner: &str,
        new: NewTransaction,
    ) -> LedgerResult<Transaction> {
        self.write(owner, |conn, now| {
            let candidate = draft(conn, owner, new, now)?;
            let (stored, touched) = commit_candidate(conn, candidate, None, now)?;
            refresh(conn, owner, &touched, now)?;
            log::info!(
                "recorded transaction {}: {} {} -> {}",
                stored.id,
                stored.amount,
                stored.from,
                stored.to
            );
            Ok((stored, touched))
        })
    }

    /// Applies `edit` to a stored transaction. The prior version is archived
    /// and the edited history must pass every rule.
    pub fn edit_transaction(
        &mut self,
        owner: &str,
        id: i64,
        edit: TransactionEdit,
    ) -> LedgerResult<Transaction> {
        self.write(owner, |conn, now| {
            let previous = store::get_transaction(conn, owner, id)?;
            let mut candidate = previous.clone();
            if let Some(ts) = edit.transaction_timestamp {
                candidate.transaction_timestamp = ts;
            }
            if let Some(description) = edit.description {
                candidate.description = description;
            }
            if let Some(amount) = edit.amount {
                candidate.amount = amount;
            }
            if candidate == previous {
                return Err(LedgerError::validation("the edit changes nothing"));
            }
            candidate.version = previous.version + 1;
            let (stored, touched) = commit_candidate(conn, candidate, Some(&previous), now)?;
            refresh(conn, owner, &touched, now)?;
            log::info!("edited transaction {} (version {})", stored.id, stored.version);
            Ok((stored, touched))
        })
    }

    /// Records a batch atomically: one rejected row rolls back the whole batch.
    pub fn import_transactions(
        &mut self,
        owner: &str,
        batch: Vec<NewTransaction>,
    ) -> LedgerResult<Vec<Transaction>> {
        self.write(owner, |conn, now| {
            let mut touched = Touched::default();
            let mut stored = Vec::with_capacity(batch.len());
            for (row, new) in batch.into_iter().enumerate() {
                let candidate = draft(conn, owner, new, now)?;
                let (t, t_touched) = commit_candidate(conn, candidate, None, now).map_err(|e| {
                    log::warn!("import row {} rejected", row + 1);
                    e
                })?;
                touched.loans.extend(t_touched.loans);
                touched.budgets.extend(t_touched.budgets);
                stored.push(t);
            }
            refresh(conn, owner, &touched, now)?;
            log::info!("imported {} transactions", stored.len());
            Ok((stored, touched))
        })
    }

    pub fn get_transaction(&self, owner: &str, id: i64) -> LedgerResult<Transaction> {
        store::get_transaction(&self.conn, owner, id)
    }

    pub fn list_transactions(
        &self,
        owner: &str,
        address: Option<&Address>,
        page: Page,
    ) -> LedgerResult<Vec<Transaction>> {
        match address {
            Some(a) => store::transactions_touching(&self.conn, owner, a, page),
            None => store::list_transactions(&self.conn, owner, page),
        }
    }

    /// Archived versions, oldest first.
    pub fn transaction_history(&self, owner: &str, id: i64) -> LedgerResult<Vec<TransactionVersion>> {
        store::transaction_versions(&self.conn, owner, id)
    }

    // ---- maintenance ----

    /// Cross-checks stored derived fields against fresh replays without writing.
    pub fn diagnose(&self, owner: &str) -> LedgerResult<Vec<Issue>> {
        let mut issues = Vec::new();
        let now = self.clock.now_ms();
        let mut replays: HashMap<i64, (Loan, LoanReplay)> = HashMap::new();

        for loan in store::list_loans(&self.conn, owner)? {
            let horizon = store::loan_derived_at(&self.conn, loan.id)?;
            let at_horizon = match replay_loan(&self.conn, owner, &loan, horizon) {
                Ok(r) => r,
                Err(e) => {
                    issues.push(issue("loan_replay_failed", format!("loan {}: {}", loan.id, e)));
                    continue;
                }
            };
            if at_horizon.summary != loan.summary {
                issues.push(issue(
                    "loan_summary_stale",
                    format!("loan {} stored summary differs from replay", loan.id),
                ));
            }
            let expected = lifecycle::reconcile(loan.status, &at_horizon.summary);
            if expected != loan.status {
                issues.push(issue(
                    "loan_status_stale",
                    format!("loan {} is {} but should be {}", loan.id, loan.status.as_str(), expected.as_str()),
                ));
            }
            if let Some(bad) = at_horizon.first_overpayment() {
                issues.push(issue(
                    "loan_overpaid",
                    format!("loan {} principal negative after {:?}", loan.id, bad.transaction_id),
                ));
            }
            match replay_loan(&self.conn, owner, &loan, now) {
                Ok(r) => {
                    replays.insert(loan.id, (loan, r));
                }
                Err(e) => issues.push(issue("loan_replay_failed", format!("loan {}: {}", loan.id, e))),
            }
        }

        for budget in store::list_budgets(&self.conn, owner)? {
            let history =
                store::transactions_touching(&self.conn, owner, &Address::budget(budget.id), Page::ALL)?;
            let loan_ids = store::loan_ids_for_budget(&self.conn, owner, budget.id)?;
            let links: Vec<LoanLink<'_>> = loan_ids
                .iter()
                .filter_map(|id| replays.get(id))
                .map(|(loan, replay)| LoanLink { loan, replay })
                .collect();
            let stats = aggregate::aggregate(budget.id, &history, &links)?;
            if stats != budget.current_stats {
                issues.push(issue(
                    "budget_stats_stale",
                    format!("budget {} stored stats differ from history", budget.id),
                ));
            }
            if let Some(p) = aggregate::available_timeline(budget.id, &history)?
                .iter()
                .find(|p| arith::round2(p.available) < Decimal::ZERO)
            {
                issues.push(issue(
                    "budget_overdrawn",
                    format!("budget {} below zero after transaction {}", budget.id, p.transaction_id),
                ));
            }
        }
        Ok(issues)
    }

    fn write<T, F>(&mut self, owner: &str, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&Connection, i64) -> LedgerResult<(T, Touched)>,
    {
        let now = self.clock.now_ms();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let (value, touched) = f(&tx, now)?;
        tx.commit()?;
        for id in touched.loans {
            self.loans.invalidate(&(owner.to_string(), id));
        }
        for id in touched.budgets {
            self.budgets.invalidate(&(owner.to_string(), id));
        }
        Ok(value)
    }
}

fn issue(kind: &str, detail: String) -> Issue {
    Issue {
        kind: kind.to_string(),
        detail,
    }
}

/// Superseded rates plus the current one.
fn loan_schedule(conn: &Connection, loan: &Loan) -> LedgerResult<RateSchedule> {
    let mut versions = store::rate_history(conn, RateOwner::Loan, loan.id)?;
    versions.push(loan.interest_rate.clone());
    RateSchedule::new(versions)
}

fn replay_loan(conn: &Connection, owner: &str, loan: &Loan, horizon: i64) -> LedgerResult<LoanReplay> {
    let rates = loan_schedule(conn, loan)?;
    let history = store::transactions_touching(conn, owner, &Address::loan(loan.id), Page::ALL)?;
    replay::replay(loan.id, &rates, &history, horizon)
}

/// The loan plus every budget that funded it.
fn loan_touch(conn: &Connection, owner: &str, loan_id: i64) -> LedgerResult<Touched> {
    let mut touched = Touched::default();
    touched.loans.insert(loan_id);
    touched
        .budgets
        .extend(store::budget_ids_for_loan(conn, owner, loan_id)?);
    Ok(touched)
}

/// Builds the stored shape of a proposal. Fundings without an explicit rate
/// snapshot the funding budget's default rate.
fn draft(conn: &Connection, owner: &str, new: NewTransaction, now: i64) -> LedgerResult<Transaction> {
    let mut candidate = Transaction {
        id: PROVISIONAL_ID,
        owner: owner.to_string(),
        transaction_timestamp: new.transaction_timestamp,
        entry_timestamp: now,
        description: new.description,
        amount: new.amount,
        from: new.from,
        to: new.to,
        interest_rate: new.interest_rate,
        version: 1,
    };
    if candidate.interest_rate.is_none() && candidate.to.loan_id().is_some() {
        if let Some(budget_id) = candidate.from.budget_id() {
            let budget = store::get_budget(conn, owner, budget_id)?;
            candidate.interest_rate = Some(budget.default_interest_rate);
        }
    }
    Ok(candidate)
}

/// Validates `candidate` against everything it touches and persists it.
fn commit_candidate(
    conn: &Connection,
    candidate: Transaction,
    previous: Option<&Transaction>,
    now: i64,
) -> LedgerResult<(Transaction, Touched)> {
    let owner = candidate.owner.clone();
    validator::check_shape(&candidate)?;

    let budget_ids = candidate.budget_ids();
    let mut budgets = Vec::with_capacity(budget_ids.len());
    let mut budget_histories = Vec::with_capacity(budget_ids.len());
    for id in &budget_ids {
        budgets.push(store::get_budget(conn, &owner, *id)?);
        budget_histories.push(store::transactions_touching(
            conn,
            &owner,
            &Address::budget(*id),
            Page::ALL,
        )?);
    }
    let loan = candidate
        .loan_id()
        .map(|id| store::get_loan(conn, &owner, id))
        .transpose()?;
    let loan_context = match &loan {
        Some(l) => Some((
            loan_schedule(conn, l)?,
            store::transactions_touching(conn, &owner, &Address::loan(l.id), Page::ALL)?,
        )),
        None => None,
    };

    let budget_ledgers: Vec<BudgetLedger<'_>> = budgets
        .iter()
        .zip(&budget_histories)
        .map(|(budget, history)| BudgetLedger { budget, history })
        .collect();
    let loan_ledgers: Vec<LoanLedger<'_>> = match (&loan, &loan_context) {
        (Some(loan), Some((rates, history))) => vec![LoanLedger {
            loan,
            rates,
            history,
        }],
        _ => Vec::new(),
    };
    let proposal = Proposal {
        candidate: &candidate,
        exclude: previous.map(|p| p.id),
        now,
    };
    if let Err(err) = validator::validate(&proposal, &budget_ledgers, &loan_ledgers) {
        log::warn!(
            "rejected {} {} -> {}: {}",
            candidate.amount,
            candidate.from,
            candidate.to,
            err
        );
        return Err(err);
    }

    let stored = match previous {
        Some(prev) => {
            store::archive_transaction_version(conn, prev, now)?;
            store::update_transaction(conn, &candidate)?;
            candidate
        }
        None => {
            let id = store::insert_transaction(conn, &candidate)?;
            Transaction { id, ..candidate }
        }
    };

    let mut touched = match &loan {
        Some(l) => loan_touch(conn, &owner, l.id)?,
        None => Touched::default(),
    };
    touched.budgets.extend(budget_ids);
    Ok((stored, touched))
}

fn refresh(conn: &Connection, owner: &str, touched: &Touched, now: i64) -> LedgerResult<()> {
    let mut rc = Recompute::new(conn, owner, now);
    for id in &touched.loans {
        rc.loan(*id)?;
    }
    for id in &touched.budgets {
        rc.budget(*id)?;
    }
    Ok(())
}

/// Replays and aggregates within one commit, replaying each loan at most once.
struct Recompute<'c> {
    conn: &'c Connection,
    owner: &'c str,
    now: i64,
    replays: HashMap<i64, (Loan, LoanReplay)>,
}

impl<'c> Recompute<'c> {
    fn new(conn: &'c Connection, owner: &'c str, now: i64) -> Self {
        Self {
            conn,
            owner,
            now,
            replays: HashMap::new(),
        }
    }

    fn loan(&mut self, id: i64) -> LedgerResult<&(Loan, LoanReplay)> {
        if !self.replays.contains_key(&id) {
            let loan = store::get_loan(self.conn, self.owner, id)?;
            let replayed = replay_loan(self.conn, self.owner, &loan, self.now)?;
            let status = lifecycle::reconcile(loan.status, &replayed.summary);
            if status != loan.status {
                log::info!(
                    "loan {} status {} -> {}",
                    id,
                    loan.status.as_str(),
                    status.as_str()
                );
            }
            store::save_loan_derived(self.conn, id, status, &replayed.summary, self.now)?;
            let loan = Loan {
                status,
                summary: replayed.summary.clone(),
                ..loan
            };
            self.replays.insert(id, (loan, replayed));
        }
        self.replays
            .get(&id)
            .ok_or(LedgerError::NotFound { kind: "loan", id })
    }

    fn loan_view(&mut self, id: i64) -> LedgerResult<LoanView> {
        let now = self.now;
        let (loan, replayed) = self.loan(id)?;
        Ok(LoanView {
            loan: loan.clone(),
            intervals: replayed.intervals.clone(),
            shares: replayed.shares.clone(),
            as_of: now,
        })
    }

    fn budget(&mut self, id: i64) -> LedgerResult<BudgetView> {
        let budget = store::get_budget(self.conn, self.owner, id)?;
        let history =
            store::transactions_touching(self.conn, self.owner, &Address::budget(id), Page::ALL)?;
        let loan_ids = store::loan_ids_for_budget(self.conn, self.owner, id)?;
        for loan_id in &loan_ids {
            self.loan(*loan_id)?;
        }
        let links: Vec<LoanLink<'_>> = loan_ids
            .iter()
            .filter_map(|loan_id| self.replays.get(loan_id))
            .map(|(loan, replay)| LoanLink { loan, replay })
            .collect();
        let stats = aggregate::aggregate(id, &history, &links)?;
        store::save_budget_stats(self.conn, id, &stats)?;
        let timeline = aggregate::available_timeline(id, &history)?;
        Ok(BudgetView {
            budget: Budget {
                current_stats: stats,
                ..budget
            },
            timeline,
            loan_ids,
        })
    }
}
