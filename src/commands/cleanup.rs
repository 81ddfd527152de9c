//! The cleanup verb: retention sweep over terminal transactions.

use super::{format_epoch, open_manager, warn_if_not_root, Context};
use crate::cli::CleanupArgs;
use anyhow::Result;
use colored::Colorize;

pub fn run(ctx: &Context, args: CleanupArgs) -> Result<()> {
    let mut manager = open_manager(ctx, false)?;

    if args.dry_run {
        let expired = manager.expired(args.older_than)?;
        if expired.is_empty() {
            println!(
                "Nothing to clean up (no terminal transactions older than {} days).",
                args.older_than
            );
            return Ok(());
        }
        println!("Would remove {} transaction(s):", expired.len());
        for tx in expired {
            println!(
                "  {} {} ({}, created {})",
                tx.id,
                tx.package_name,
                tx.status,
                format_epoch(tx.created_at)
            );
        }
        return Ok(());
    }

    warn_if_not_root();
    let removed = manager.gc(args.older_than)?;
    println!(
        "  {} Cleaned up {removed} transaction(s) older than {} days",
        "✓".green(),
        args.older_than
    );
    Ok(())
}
