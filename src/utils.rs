// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveDateTime};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use rusqlite::{Connection, OptionalExtension, params};
use rust_decimal::Decimal;

use crate::models::{InterestRate, validate_timestamp};
use crate::service::DEFAULT_CACHE_TTL_SECS;

pub const DEFAULT_OWNER: &str = "local";

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM[:SS]` (UTC) or epoch milliseconds.
pub fn parse_timestamp(s: &str) -> Result<i64> {
    let s = s.trim();
    let ms = if let Ok(ms) = s.parse::<i64>() {
        ms
    } else if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        d.and_hms_opt(0, 0, 0)
            .context("Invalid date")?
            .and_utc()
            .timestamp_millis()
    } else {
        let normalized = s.replacen(' ', "T", 1);
        ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
            .iter()
            .find_map(|f| NaiveDateTime::parse_from_str(&normalized, f).ok())
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| {
                anyhow!(
                    "Invalid timestamp '{}', expected YYYY-MM-DD, YYYY-MM-DDTHH:MM or epoch ms",
                    s
                )
            })?
    };
    Ok(validate_timestamp(ms, "timestamp")?)
}

pub fn fmt_timestamp(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

pub fn parse_decimal(s: &str) -> Result<Decimal> {
    s.trim()
        .parse::<Decimal>()
        .with_context(|| format!("Invalid decimal '{}'", s))
}

pub fn fmt_money(d: &Decimal) -> String {
    format!("{:.2}", crate::engine::arith::round2(*d))
}

/// Builds a rate from CLI-style parts, e.g. `percentage month 5`.
pub fn parse_rate(
    rate_type: &str,
    duration: &str,
    amount: &str,
    compounding: bool,
    entry_timestamp: i64,
) -> Result<InterestRate> {
    let rate = InterestRate {
        rate_type: rate_type.parse()?,
        duration: duration.parse()?,
        amount: parse_decimal(amount)?,
        is_compounding: compounding,
        entry_timestamp,
    };
    rate.validate()?;
    Ok(rate)
}

/// Required clap argument; clap enforces presence, this only avoids panicking.
pub fn required_arg<'a>(m: &'a clap::ArgMatches, name: &str) -> Result<&'a str> {
    m.get_one::<String>(name)
        .map(String::as_str)
        .with_context(|| format!("Missing argument '{}'", name))
}

/// Rate built from the `--rate*` flags, or `None` when `--rate` is absent.
pub fn rate_from_matches(m: &clap::ArgMatches, entry_timestamp: i64) -> Result<Option<InterestRate>> {
    let Some(amount) = m.get_one::<String>("rate") else {
        return Ok(None);
    };
    let rate = parse_rate(
        required_arg(m, "rate_type")?,
        required_arg(m, "rate_duration")?,
        amount,
        m.get_flag("compounding"),
        entry_timestamp,
    )?;
    Ok(Some(rate))
}

pub fn fmt_rate(rate: &InterestRate) -> String {
    let unit = match rate.rate_type {
        crate::models::RateType::PercentagePerDuration => "%",
        crate::models::RateType::FixedPerDuration => "",
    };
    let per = match rate.duration.days() {
        Some(_) => format!("{:?}", rate.duration).to_lowercase(),
        None => "full term".to_string(),
    };
    let compounding = if rate.is_compounding { " compounding" } else { "" };
    format!("{}{} / {}{}", rate.amount, unit, per, compounding)
}

pub fn pretty_table(headers: &[&str], rows: Vec<Vec<String>>) -> Table {
    let mut t = Table::new();
    t.load_preset(UTF8_FULL);
    t.set_header(headers.iter().map(|h| Cell::new(*h)));
    for r in rows {
        t.add_row(r.into_iter().map(Cell::new));
    }
    t
}

pub fn maybe_print_json<T: serde::Serialize>(
    json_flag: bool,
    jsonl_flag: bool,
    v: &T,
) -> Result<bool> {
    if json_flag {
        println!("{}", serde_json::to_string_pretty(v)?);
        return Ok(true);
    }
    if jsonl_flag {
        // If v is an array, stream each element; else stream single line
        let val = serde_json::to_value(v)?;
        if let Some(arr) = val.as_array() {
            for item in arr {
                println!("{}", serde_json::to_string(item)?);
            }
        } else {
            println!("{}", serde_json::to_string(&val)?);
        }
        return Ok(true);
    }
    Ok(false)
}

// Settings
pub fn get_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM settings WHERE key=?1",
            params![key],
            |r| r.get(0),
        )
        .optional()?)
}

pub fn set_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        params![key, value],
    )?;
    Ok(())
}

/// `--owner` wins over the stored setting, which wins over the default.
pub fn resolve_owner(conn: &Connection, cli_owner: Option<&String>) -> Result<String> {
    if let Some(o) = cli_owner {
        return Ok(o.trim().to_string());
    }
    Ok(get_setting(conn, "owner")?.unwrap_or_else(|| DEFAULT_OWNER.to_string()))
}

pub fn cache_ttl_secs(conn: &Connection) -> Result<i64> {
    match get_setting(conn, "cache_ttl_secs")? {
        Some(v) => v
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Invalid cache_ttl_secs '{}'", v)),
        None => Ok(DEFAULT_CACHE_TTL_SECS),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_parse_in_every_supported_form() {
        assert_eq!(parse_timestamp("2025-01-01").unwrap(), 1_735_689_600_000);
        assert_eq!(parse_timestamp("2025-01-01T01:00").unwrap(), 1_735_693_200_000);
        assert_eq!(parse_timestamp("2025-01-01 01:00:30").unwrap(), 1_735_693_230_000);
        assert_eq!(parse_timestamp("1735689600000").unwrap(), 1_735_689_600_000);
        assert!(parse_timestamp("01/02/2025").is_err());
        assert!(parse_timestamp("-5").is_err());
        assert_eq!(fmt_timestamp(1_735_693_200_000), "2025-01-01 01:00");
    }

    #[test]
    fn rates_parse_from_cli_words() {
        let r = parse_rate("percentage", "month", "5", true, 0).unwrap();
        assert!(r.is_periodic_percentage());
        assert_eq!(fmt_rate(&r), "5% / month compounding");
        assert!(parse_rate("fixed", "full", "-1", false, 0).is_err());
    }

    #[test]
    fn owner_resolution_prefers_cli_then_setting() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        assert_eq!(resolve_owner(&conn, None).unwrap(), DEFAULT_OWNER);
        set_setting(&conn, "owner", "alice").unwrap();
        assert_eq!(resolve_owner(&conn, None).unwrap(), "alice");
        let cli = "bob".to_string();
        assert_eq!(resolve_owner(&conn, Some(&cli)).unwrap(), "bob");
        assert_eq!(cache_ttl_secs(&conn).unwrap(), DEFAULT_CACHE_TTL_SECS);
    }
}
