//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - daemon: run cycles on the configured interval
//! - run-all / run: one-off cycle or single job
//! - jobs / status: catalog and scheduler state
//! - records: inspect and prune the record store

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Harvestr - scheduled collection jobs feeding an incremental record store
#[derive(Parser, Debug)]
#[command(name = "harvestr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run cycles on the configured interval until interrupted
    Daemon {
        /// Wait for the first interval instead of running immediately
        #[arg(long)]
        no_run_on_start: bool,
    },

    /// Run the whole catalog once and exit
    RunAll,

    /// Run a single job and exit with its exit code
    Run {
        /// Job id from the catalog
        id: String,
    },

    /// List the merged job catalog
    Jobs,

    /// Show the last status snapshot written by the scheduler
    Status {
        /// Print raw JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect and prune collected records
    Records {
        #[command(subcommand)]
        command: RecordsCommands,
    },
}

/// Record store subcommands
#[derive(Subcommand, Debug)]
pub enum RecordsCommands {
    /// Show one record with its change log
    Get {
        /// Record source
        source: String,

        /// External id within the source
        external_id: String,
    },

    /// List records as JSON lines
    List {
        /// Filter such as `price>1000`, `source=autoscout24.de` or `year in 2019,2020`
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,

        /// Comma-separated fields to include
        #[arg(short, long, value_delimiter = ',')]
        fields: Vec<String>,
    },

    /// Count matching records
    Count {
        /// Filter expression (repeatable)
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
    },

    /// Delete matching records
    Delete {
        /// Filter expression (repeatable, at least one)
        #[arg(short = 'w', long = "where", required = true)]
        filters: Vec<String>,
    },
}
