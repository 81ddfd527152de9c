//! The install verb: validate → requirements → pre-hooks → begin →
//! execute → commit, with rollback on any failure.

use super::{open_manager, warn_if_not_root, Context};
use crate::cli::InstallArgs;
use crate::paths;
use anyhow::{bail, Context as _, Result};
use colored::Colorize;
use metadata::PackageMetadata;
use txcore::RecoveryAction;

pub fn run(ctx: &Context, args: InstallArgs) -> Result<()> {
    let metadata = metadata::parse_file(&args.package_file)
        .with_context(|| format!("invalid package file {}", args.package_file.display()))?;

    println!(
        "Installing package: {} v{}",
        metadata.package.name.bold(),
        metadata.package.version
    );
    if !ctx.quiet {
        print_plan(&metadata);
    }

    if args.dry_run {
        println!();
        println!("  {} Dry run - package is valid, nothing installed", "ℹ".blue());
        return Ok(());
    }

    warn_if_not_root();

    if let Some(requirements) = &metadata.requirements {
        let db = paths::db_path(ctx.db.as_deref())?;
        let probe_dir = db.parent().map(|p| p.to_path_buf()).unwrap_or_default();
        txcore::requirements::check(requirements, &probe_dir)?;
    }

    if !args.yes && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(());
    }

    // Pre-install hooks run outside the transaction; a failure here aborts
    // before anything is snapshotted or begun.
    for hook in &metadata.pre_install {
        if let Err(e) = txcore::hooks::run_hook(hook) {
            bail!("pre_install hook failed: {e}");
        }
    }

    let mut manager = open_manager(ctx, args.allow_irreversible)?;

    // Resolve anything a previous crash left behind before starting.
    for action in manager.recover()? {
        report_recovery(&action);
    }

    let id = manager.begin(&metadata)?;
    println!("Started transaction {id}");

    match manager.execute(&metadata.install_steps) {
        Ok(()) => {
            println!(
                "  {} Package {} installed successfully",
                "✓".green().bold(),
                metadata.package.name
            );
            run_post_hooks(&metadata);
            Ok(())
        }
        Err(e) => {
            let status = manager
                .status(id)
                .map(|view| view.status.to_string())
                .unwrap_or_else(|_| "unknown".into());
            eprintln!(
                "  {} Installation failed; transaction {id} is {status}",
                "✗".red().bold()
            );
            Err(e.into())
        }
    }
}

/// Post-install hooks run after commit; failures are reported but never
/// undo the committed transaction.
fn run_post_hooks(metadata: &PackageMetadata) {
    for (index, hook) in metadata.post_install.iter().enumerate() {
        if let Err(e) = txcore::hooks::run_hook(hook) {
            log::warn!("post_install hook {index} failed: {e}");
            eprintln!("  {} post_install hook {index} failed: {e}", "⚠".yellow());
        }
    }
}

fn print_plan(metadata: &PackageMetadata) {
    println!("Installation steps:");
    for (index, step) in metadata.install_steps.iter().enumerate() {
        let label = step
            .description
            .as_deref()
            .map(|d| format!(" - {d}"))
            .unwrap_or_default();
        println!("  {}. {}{}", index + 1, step.kind(), label);
    }
}

fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

fn report_recovery(action: &RecoveryAction) {
    match action {
        RecoveryAction::DeletedEmpty { id } => {
            println!("  {} removed empty orphaned transaction {id}", "○".normal());
        }
        RecoveryAction::RolledBack { id } => {
            println!(
                "  {} rolled back interrupted transaction {id}",
                "↺".yellow()
            );
        }
        RecoveryAction::Failed { id, uncompensated } => {
            eprintln!(
                "  {} transaction {id} could not be fully rolled back ({uncompensated} steps); run 'aptomic rollback {id}'",
                "✗".red()
            );
        }
    }
}
