//! The create-template verb: write a starter metadata document.

use crate::cli::TemplateArgs;
use anyhow::{Context as _, Result};
use colored::Colorize;

pub fn run(args: TemplateArgs) -> Result<()> {
    let metadata = metadata::template(&args.package_name, &args.version);

    match &args.output {
        Some(path) => {
            metadata::save_file(&metadata, path)
                .with_context(|| format!("could not write template to {}", path.display()))?;
            println!(
                "  {} Template saved to {}",
                "✓".green(),
                path.display()
            );
        }
        None => {
            print!("{}", metadata::to_yaml(&metadata)?);
        }
    }

    Ok(())
}
