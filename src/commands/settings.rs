// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use crate::utils::{DEFAULT_OWNER, cache_ttl_secs, get_setting, pretty_table, required_arg, set_setting};
use anyhow::{Result, bail};
use rusqlite::Connection;

const KEYS: [&str; 2] = ["owner", "cache_ttl_secs"];

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("set", sub)) => {
            let key = required_arg(sub, "key")?.trim();
            let value = required_arg(sub, "value")?.trim();
            set(conn, key, value)?;
            println!("{} = {}", key, value);
        }
        Some(("show", _)) => {
            let owner = get_setting(conn, "owner")?.unwrap_or_else(|| DEFAULT_OWNER.to_string());
            let ttl = cache_ttl_secs(conn)?;
            println!(
                "{}",
                pretty_table(
                    &["Key", "Value"],
                    vec![
                        vec!["owner".into(), owner],
                        vec!["cache_ttl_secs".into(), ttl.to_string()],
                    ],
                )
            );
        }
        _ => {}
    }
    Ok(())
}

/// Stores a known setting after checking its value parses.
pub fn set(conn: &Connection, key: &str, value: &str) -> Result<()> {
    match key {
        "owner" if value.is_empty() => bail!("owner must not be empty"),
        "cache_ttl_secs" => {
            if value.parse::<i64>().map(|v| v < 0).unwrap_or(true) {
                bail!("cache_ttl_secs must be a non-negative integer");
            }
        }
        k if !KEYS.contains(&k) => bail!("Unknown setting '{}', expected one of {:?}", k, KEYS),
        _ => {}
    }
    set_setting(conn, key, value)?;
    log::info!("setting {} updated", key);
    Ok(())
}
