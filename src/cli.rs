// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use clap::{Arg, ArgAction, Command, value_parser};

fn output_flags(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("json")
            .long("json")
            .action(ArgAction::SetTrue)
            .help("Print pretty JSON"),
    )
    .arg(
        Arg::new("jsonl")
            .long("jsonl")
            .action(ArgAction::SetTrue)
            .conflicts_with("json")
            .help("Print one JSON object per line"),
    )
}

/// `--rate-type`, `--rate-duration`, `--rate`, `--compounding`.
fn rate_args(cmd: Command, required: bool) -> Command {
    cmd.arg(
        Arg::new("rate")
            .long("rate")
            .required(required)
            .help("Rate amount: percent for percentage rates, money for fixed rates"),
    )
    .arg(
        Arg::new("rate_type")
            .long("rate-type")
            .default_value("percentage")
            .help("percentage | fixed"),
    )
    .arg(
        Arg::new("rate_duration")
            .long("rate-duration")
            .default_value("year")
            .help("day | week | month | year | full"),
    )
    .arg(
        Arg::new("compounding")
            .long("compounding")
            .action(ArgAction::SetTrue)
            .help("Compound hourly on outstanding interest"),
    )
}

fn id_arg() -> Arg {
    Arg::new("id").required(true).value_parser(value_parser!(i64))
}

pub fn build_cli() -> Command {
    Command::new("loanclip")
        .about("Peer-lending ledger: budgets, loans and interest accrual")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("owner")
                .long("owner")
                .global(true)
                .help("Ledger owner; defaults to the 'owner' setting"),
        )
        .subcommand(Command::new("init").about("Create the database"))
        .subcommand(
            Command::new("config")
                .about("Settings")
                .subcommand(
                    Command::new("set")
                        .arg(Arg::new("key").required(true).help("owner | cache_ttl_secs"))
                        .arg(Arg::new("value").required(true)),
                )
                .subcommand(Command::new("show")),
        )
        .subcommand(
            Command::new("budget")
                .about("Capital pools")
                .subcommand(rate_args(
                    Command::new("add")
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(Arg::new("description").long("description")),
                    false,
                ))
                .subcommand(output_flags(Command::new("list")))
                .subcommand(output_flags(Command::new("show").arg(id_arg())))
                .subcommand(Command::new("archive").arg(id_arg()))
                .subcommand(rate_args(
                    Command::new("set-rate")
                        .arg(id_arg())
                        .arg(Arg::new("effective").long("effective")),
                    true,
                )),
        )
        .subcommand(
            Command::new("loan")
                .about("Loans and their lifecycle")
                .subcommand(rate_args(
                    Command::new("add")
                        .arg(Arg::new("name").long("name").required(true))
                        .arg(Arg::new("customer").long("customer"))
                        .arg(Arg::new("opened").long("opened").required(true))
                        .arg(Arg::new("closes").long("closes").required(true))
                        .arg(
                            Arg::new("frequency")
                                .long("frequency")
                                .default_value("monthly")
                                .help("daily | weekly | biweekly | monthly | yearly"),
                        )
                        .arg(Arg::new("notes").long("notes")),
                    false,
                ))
                .subcommand(output_flags(Command::new("list")))
                .subcommand(output_flags(
                    Command::new("show").arg(id_arg()).arg(
                        Arg::new("intervals")
                            .long("intervals")
                            .action(ArgAction::SetTrue)
                            .help("Show the replayed balance after every transaction"),
                    ),
                ))
                .subcommand(
                    Command::new("status")
                        .arg(id_arg())
                        .arg(
                            Arg::new("status")
                                .required(true)
                                .help("active | paused | completed | defaulted"),
                        ),
                )
                .subcommand(rate_args(
                    Command::new("set-rate")
                        .arg(id_arg())
                        .arg(Arg::new("effective").long("effective")),
                    true,
                )),
        )
        .subcommand(
            Command::new("tx")
                .about("Ledger transactions")
                .subcommand(
                    Command::new("add")
                        .arg(
                            Arg::new("from")
                                .long("from")
                                .required(true)
                                .help("budget:ID | loan:ID | outside | interest[:BUDGET] | fee[:BUDGET]"),
                        )
                        .arg(
                            Arg::new("to")
                                .long("to")
                                .required(true)
                                .help("budget:ID | loan:ID | outside | forgiveness[:BUDGET]"),
                        )
                        .arg(Arg::new("amount").long("amount").required(true))
                        .arg(Arg::new("date").long("date").required(true))
                        .arg(Arg::new("description").long("description")),
                )
                .subcommand(
                    Command::new("edit")
                        .arg(id_arg())
                        .arg(Arg::new("date").long("date"))
                        .arg(Arg::new("amount").long("amount"))
                        .arg(Arg::new("description").long("description")),
                )
                .subcommand(output_flags(
                    Command::new("list")
                        .arg(
                            Arg::new("budget")
                                .long("budget")
                                .value_parser(value_parser!(i64))
                                .conflicts_with("loan"),
                        )
                        .arg(Arg::new("loan").long("loan").value_parser(value_parser!(i64)))
                        .arg(
                            Arg::new("limit")
                                .long("limit")
                                .value_parser(value_parser!(usize)),
                        ),
                ))
                .subcommand(output_flags(Command::new("history").arg(id_arg()))),
        )
        .subcommand(output_flags(rate_args(
            Command::new("project")
                .about("Amortization schedule for a prospective loan")
                .arg(Arg::new("principal").long("principal").required(true))
                .arg(Arg::new("opened").long("opened").required(true))
                .arg(Arg::new("closes").long("closes").required(true))
                .arg(
                    Arg::new("frequency")
                        .long("frequency")
                        .default_value("monthly"),
                ),
            true,
        )))
        .subcommand(
            Command::new("import").subcommand(
                Command::new("transactions")
                    .about("Import date,from,to,amount,description rows atomically")
                    .arg(Arg::new("path").required(true)),
            ),
        )
        .subcommand(output_flags(
            Command::new("doctor").about("Check stored balances against a fresh replay"),
        ))
}
