// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

static APP: Lazy<(&str, &str, &str)> =
    Lazy::new(|| ("com.alphavelocity", "Loanclip", "loanclip"));

/// Overrides the platform data directory when set.
pub const DB_ENV: &str = "LOANCLIP_DB";

const SCHEMA_VERSION: i64 = 1;

pub fn db_path() -> Result<PathBuf> {
    if let Some(p) = std::env::var_os(DB_ENV) {
        return Ok(PathBuf::from(p));
    }
    let proj = ProjectDirs::from(APP.0, APP.1, APP.2)
        .context("Could not determine platform-specific data dir")?;
    let data_dir = proj.data_dir();
    fs::create_dir_all(data_dir).context("Failed to create data dir")?;
    Ok(data_dir.join("loanclip.sqlite"))
}

pub fn open_or_init() -> Result<Connection> {
    open_at(&db_path()?)
}

pub fn open_at(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("Open DB at {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    let mut version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version < 1 {
        apply_migration_1(conn)?;
        version = 1;
        conn.pragma_update(None, "user_version", version)?;
    }
    if version > SCHEMA_VERSION {
        log::warn!(
            "database schema {} is newer than this build ({})",
            version,
            SCHEMA_VERSION
        );
    }
    Ok(())
}

fn apply_migration_1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
    CREATE TABLE IF NOT EXISTS settings(
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS budgets(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        rate_json TEXT NOT NULL,
        is_archived INTEGER NOT NULL DEFAULT 0,
        stats_json TEXT NOT NULL DEFAULT '{}',
        UNIQUE(owner, name)
    );

    CREATE TABLE IF NOT EXISTS loans(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        name TEXT NOT NULL,
        customer_id TEXT,
        opened_ts INTEGER NOT NULL,
        closes_ts INTEGER NOT NULL,
        payment_frequency TEXT NOT NULL,
        notes TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'ACTIVE',
        rate_json TEXT NOT NULL,
        derived_json TEXT NOT NULL DEFAULT '{}',
        derived_at INTEGER NOT NULL DEFAULT 0,
        defaulted_json TEXT
    );

    CREATE TABLE IF NOT EXISTS transactions(
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner TEXT NOT NULL,
        transaction_ts INTEGER NOT NULL,
        entry_ts INTEGER NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        amount TEXT NOT NULL,
        from_kind TEXT NOT NULL,
        from_id INTEGER,
        to_kind TEXT NOT NULL,
        to_id INTEGER,
        rate_json TEXT,
        version INTEGER NOT NULL DEFAULT 1
    );
    CREATE INDEX IF NOT EXISTS idx_transactions_from ON transactions(owner, from_kind, from_id, transaction_ts);
    CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions(owner, to_kind, to_id, transaction_ts);

    CREATE TABLE IF NOT EXISTS transaction_versions(
        transaction_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        archived_at INTEGER NOT NULL,
        snapshot_json TEXT NOT NULL,
        PRIMARY KEY(transaction_id, version),
        FOREIGN KEY(transaction_id) REFERENCES transactions(id) ON DELETE CASCADE
    );

    -- superseded rates; the current rate lives on the entity row
    CREATE TABLE IF NOT EXISTS rate_versions(
        entity_kind TEXT NOT NULL CHECK(entity_kind IN ('BUDGET','LOAN')),
        entity_id INTEGER NOT NULL,
        version INTEGER NOT NULL,
        rate_json TEXT NOT NULL,
        superseded_at INTEGER NOT NULL,
        PRIMARY KEY(entity_kind, entity_id, version)
    );
    "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent_and_versioned() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        let v: i64 = conn
            .pragma_query_value(None, "user_version", |r| r.get(0))
            .unwrap();
        assert_eq!(v, SCHEMA_VERSION);
    }
}
