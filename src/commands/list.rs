//! The list verb: recent transactions in a table.

use super::{format_epoch, open_manager, paint_status, Context};
use crate::cli::ListArgs;
use anyhow::{anyhow, Result};
use txlog::TxnStatus;

pub fn run(ctx: &Context, args: ListArgs) -> Result<()> {
    let status = args
        .status
        .as_deref()
        .map(|s| TxnStatus::parse(s).map_err(|_| anyhow!("unknown status '{s}'")))
        .transpose()?;

    let manager = open_manager(ctx, false)?;
    let transactions = manager.list(args.limit, status)?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<24} {:<20} {:<6} {:<20}",
        "ID", "Package", "Status", "Steps", "Created"
    );
    println!("{}", "-".repeat(80));

    for tx in transactions {
        println!(
            "{:<8} {:<24} {:<20} {:<6} {:<20}",
            tx.id,
            tx.package_name,
            paint_status(tx.status),
            tx.steps.len(),
            format_epoch(tx.created_at)
        );
    }

    Ok(())
}
