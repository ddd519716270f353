// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use std::sync::Arc;

use anyhow::Result;

use loanclip::cache::SystemClock;
use loanclip::service::Ledger;
use loanclip::{cli, commands, db, utils};

fn main() -> Result<()> {
    env_logger::init();
    let cli = cli::build_cli();
    let matches = cli.get_matches();

    let conn = db::open_or_init()?;

    match matches.subcommand() {
        Some(("init", _)) => {
            println!("Database initialized at {}", db::db_path()?.display());
            return Ok(());
        }
        Some(("config", sub)) => return commands::settings::handle(&conn, sub),
        Some(("project", sub)) => return commands::projections::handle(sub),
        _ => {}
    }

    let owner = utils::resolve_owner(&conn, matches.get_one::<String>("owner"))?;
    let ttl_secs = utils::cache_ttl_secs(&conn)?;
    let mut ledger = Ledger::new(conn, Arc::new(SystemClock), ttl_secs.saturating_mul(1000));

    match matches.subcommand() {
        Some(("budget", sub)) => commands::budgets::handle(&mut ledger, &owner, sub)?,
        Some(("loan", sub)) => commands::loans::handle(&mut ledger, &owner, sub)?,
        Some(("tx", sub)) => commands::transactions::handle(&mut ledger, &owner, sub)?,
        Some(("import", sub)) => commands::importer::handle(&mut ledger, &owner, sub)?,
        Some(("doctor", sub)) => commands::doctor::handle(&ledger, &owner, sub)?,
        _ => {
            cli::build_cli().print_help()?;
            println!();
        }
    }
    Ok(())
}
