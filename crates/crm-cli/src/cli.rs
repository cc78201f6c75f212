use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "contact-merge",
    about = "Merge a confirmed duplicate contact into its primary",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the dependent tables touched by finalization
    Tables(TablesArgs),
    /// Show a contact with all of its collections
    Show(ShowArgs),
    /// Run a merge session from a plan file
    Merge(MergeArgs),
}

#[derive(Args)]
pub struct TablesArgs {
    /// Merge configuration (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// JSON fixture holding the record store
    #[arg(long)]
    pub db: PathBuf,
    pub contact: String,
}

#[derive(Args)]
pub struct MergeArgs {
    /// JSON fixture holding the record store
    #[arg(long)]
    pub db: PathBuf,
    #[arg(long)]
    pub primary: String,
    #[arg(long)]
    pub duplicate: String,
    /// Per-field choices and item actions (TOML)
    #[arg(long)]
    pub plan: Option<PathBuf>,
    /// Merge configuration (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Write the resulting store back to the fixture
    #[arg(long)]
    pub write: bool,
}
