use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "nodeup")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge a node to its declared configuration", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Node config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Make the node match its configuration
    Apply(ApplyArgs),

    /// Show what apply would change
    Diff(DiffArgs),

    /// Print the task graph in execution order
    Graph,
}

#[derive(Args)]
pub struct ApplyArgs {
    /// Check changes but do not render them
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Number of tasks reconciled concurrently (overrides the config)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct DiffArgs {
    /// Number of tasks checked concurrently (overrides the config)
    #[arg(short, long)]
    pub jobs: Option<usize>,
}
