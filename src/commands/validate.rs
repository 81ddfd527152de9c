//! The validate verb: parse and schema-check a package file.

use anyhow::{Context as _, Result};
use colored::Colorize;
use std::path::Path;

pub fn run(package_file: &Path) -> Result<()> {
    let metadata = metadata::parse_file(package_file)
        .with_context(|| format!("validation failed for {}", package_file.display()))?;

    println!(
        "Package: {} v{}",
        metadata.package.name.bold(),
        metadata.package.version
    );
    if let Some(description) = &metadata.package.description {
        println!("  {description}");
    }

    println!("Installation steps: {}", metadata.install_steps.len());
    for (index, step) in metadata.install_steps.iter().enumerate() {
        let label = step
            .description
            .as_deref()
            .map(|d| format!(" - {d}"))
            .unwrap_or_default();
        println!(
            "  Step {}: {} (rollback: {}){label}",
            index + 1,
            step.kind(),
            step.rollback.as_str()
        );
    }

    if !metadata.dependencies.is_empty() {
        println!("Dependencies: {}", metadata.dependencies.join(", "));
    }
    if !metadata.conflicts.is_empty() {
        println!("Conflicts: {}", metadata.conflicts.join(", "));
    }
    if let Some(requirements) = &metadata.requirements {
        let mut parts = Vec::new();
        if let Some(mb) = requirements.min_memory {
            parts.push(format!("{mb} MB memory"));
        }
        if let Some(mb) = requirements.min_disk_space {
            parts.push(format!("{mb} MB disk"));
        }
        if let Some(os) = &requirements.os_version {
            parts.push(format!("OS >= {os}"));
        }
        if !requirements.architectures.is_empty() {
            parts.push(format!("arch {}", requirements.architectures.join("/")));
        }
        if !parts.is_empty() {
            println!("Requirements: {}", parts.join(", "));
        }
    }

    println!("  {} Package validation successful", "✓".green().bold());
    Ok(())
}
