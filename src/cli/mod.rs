use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "patchwork")]
#[command(about = "Coordinate autonomous coding agents through content-addressed patches")]
#[command(long_about = "Patchwork runs optimizer agents in isolated git worktrees, turns their \
                       edits into content-addressed patches, checks them for conflicts with \
                       work in flight and keeps every patch in an approvable, reversible store.")]
pub struct Cli {
    /// Configuration file (defaults to ./patchwork.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the store location and patch counts by status
    Status,
    /// Print the append-only patch history
    History {
        /// Only show patches created for this task
        #[arg(long, value_name = "TASK_ID")]
        task: Option<String>,
    },
    /// Print the diff and metadata of a stored patch
    Show {
        /// Patch id (content address)
        patch_id: String,
    },
    /// Approve a patch and apply it with a dry run first
    Apply {
        /// Patch id (content address)
        patch_id: String,
        /// Working tree to apply to (defaults to the configured repository)
        #[arg(long, value_name = "DIR")]
        target: Option<PathBuf>,
    },
    /// Undo an applied patch with its reversal patch
    Rollback {
        /// Patch id (content address)
        patch_id: String,
        /// Working tree to roll back (defaults to the configured repository)
        #[arg(long, value_name = "DIR")]
        target: Option<PathBuf>,
    },
    /// Run one task with a command-line agent and submit its patch
    Run {
        /// Task identifier
        task_id: String,
        /// What the agent should do
        description: String,
        /// Files the task is expected to touch
        #[arg(long = "file", value_name = "PATH")]
        files: Vec<String>,
        /// Program that edits the workspace
        #[arg(long, value_name = "PROGRAM")]
        program: String,
        /// Argument passed to the program (repeatable)
        #[arg(long = "arg", value_name = "ARG", allow_hyphen_values = true)]
        args: Vec<String>,
        /// Program deciding whether the change passes validation
        #[arg(long, value_name = "PROGRAM")]
        validator: Option<String>,
        /// Strategy label recorded for the agent
        #[arg(long, default_value = "custom:command")]
        strategy: String,
    },
    /// Store a file in the content store and print its address
    Put {
        file: PathBuf,
    },
    /// Write stored content to stdout or a file
    Get {
        address: String,
        #[arg(long, short = 'o', value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Mark stored content as must-retain
    Pin {
        address: String,
    },
}
