mod cli;
mod commands;
mod paths;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::Context;
use std::io;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        db: cli.db.clone(),
        quiet: cli.quiet,
    };

    match cli.command {
        Command::Install(args) => commands::install::run(&ctx, args),
        Command::Rollback { transaction_id } => commands::rollback::run(&ctx, transaction_id),
        Command::List(args) => commands::list::run(&ctx, args),
        Command::Status { transaction_id } => commands::status::run(&ctx, transaction_id),
        Command::Cleanup(args) => commands::cleanup::run(&ctx, args),
        Command::Validate { package_file } => commands::validate::run(&package_file),
        Command::CreateTemplate(args) => commands::template::run(args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "aptomic", &mut io::stdout());
            Ok(())
        }
    }
}
