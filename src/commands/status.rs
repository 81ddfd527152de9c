//! The status verb: one transaction with its step states.

use super::{format_epoch, open_manager, paint_status, Context};
use anyhow::Result;
use colored::Colorize;
use txlog::StepStatus;

pub fn run(ctx: &Context, transaction_id: i64) -> Result<()> {
    let manager = open_manager(ctx, false)?;
    let view = manager.status(transaction_id)?;

    println!("Transaction {}", view.id);
    println!("  Package:  {} ", view.package_name.bold());
    println!("  Status:   {}", paint_status(view.status));
    println!("  Hash:     {}", view.metadata_hash);
    println!("  Created:  {}", format_epoch(view.created_at));
    if let Some(completed) = view.completed_at {
        println!("  Finished: {}", format_epoch(completed));
    }

    if view.steps.is_empty() {
        println!("  No steps recorded.");
        return Ok(());
    }

    println!("  Steps:");
    for step in &view.steps {
        let glyph = step_glyph(step.status);
        let label = step
            .description
            .as_deref()
            .map(|d| format!(" - {d}"))
            .unwrap_or_default();
        println!(
            "    {glyph} [{}] {} ({}){label}",
            step.order,
            step.kind,
            step.status
        );
    }

    Ok(())
}

fn step_glyph(status: StepStatus) -> colored::ColoredString {
    match status {
        StepStatus::Succeeded => "✓".green(),
        StepStatus::Failed | StepStatus::CompensationFailed => "✗".red(),
        StepStatus::Compensated => "↺".yellow(),
        StepStatus::Running | StepStatus::Compensating => "→".cyan(),
        StepStatus::Pending => "○".normal(),
    }
}
