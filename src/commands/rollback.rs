//! The rollback verb: re-attempt compensation for a transaction from the
//! durable log.

use super::{open_manager, warn_if_not_root, Context};
use anyhow::Result;
use colored::Colorize;

pub fn run(ctx: &Context, transaction_id: i64) -> Result<()> {
    warn_if_not_root();

    let mut manager = open_manager(ctx, false)?;
    println!("Rolling back transaction {transaction_id}...");
    manager.rollback(transaction_id)?;
    println!(
        "  {} Transaction {transaction_id} rolled back",
        "✓".green().bold()
    );
    Ok(())
}
