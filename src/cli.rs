use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aptomic")]
#[command(version)]
#[command(about = "Transactional package installer for Debian hosts", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Override the transaction log path
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install a package from a metadata file
    Install(InstallArgs),

    /// Roll back a transaction by id
    Rollback {
        /// Transaction id
        transaction_id: i64,
    },

    /// List recent transactions
    List(ListArgs),

    /// Show detailed status for a transaction
    Status {
        /// Transaction id
        transaction_id: i64,
    },

    /// Delete old terminal transactions
    Cleanup(CleanupArgs),

    /// Validate a package metadata file
    Validate {
        /// Path to the metadata file
        package_file: PathBuf,
    },

    /// Write a metadata template for a new package
    CreateTemplate(TemplateArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args)]
pub struct InstallArgs {
    /// Path to the metadata file
    pub package_file: PathBuf,

    /// Validate the package without installing
    #[arg(long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Run steps that declare rollback: none instead of refusing
    #[arg(long)]
    pub allow_irreversible: bool,
}

#[derive(Args)]
pub struct ListArgs {
    /// Maximum number of transactions to show
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Only show transactions with this status
    #[arg(long, value_name = "STATUS")]
    pub status: Option<String>,
}

#[derive(Args)]
pub struct CleanupArgs {
    /// Remove terminal transactions older than this many days
    #[arg(long = "older-than", value_name = "DAYS", default_value_t = 30)]
    pub older_than: u32,

    /// Show what would be removed without removing it
    #[arg(long, short = 'n')]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct TemplateArgs {
    /// Name of the new package
    pub package_name: String,

    /// Version of the new package
    pub version: String,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}
