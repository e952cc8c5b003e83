//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - run: run the scheduler daemon with the built-in job bodies
//! - submit: add a job to the snapshot
//! - list: list jobs in the snapshot
//! - status: show one job
//! - cancel: cancel a job in the snapshot

use clap::{Parser, Subcommand};
use jobwright::{JobStatus, Lane};
use std::path::PathBuf;

/// Jobwright - A priority-driven background job scheduler
#[derive(Parser, Debug)]
#[command(name = "jobwright")]
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
///
/// `submit`, `list`, `status`, and `cancel` work on the snapshot file and should
/// be used while no daemon is running.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler until Ctrl-C
    Run {
        /// Override scheduler.max_workers
        #[arg(short, long)]
        workers: Option<usize>,

        /// Start in idle mode
        #[arg(long)]
        idle: bool,
    },

    /// Submit a job
    Submit {
        /// Registered job name (noop, sleep, echo, fail)
        name: String,

        /// JSON payload passed to the job body
        #[arg(long)]
        payload: Option<String>,

        /// Priority hint in [0, 1]
        #[arg(short, long, default_value_t = 0.5)]
        priority: f64,

        /// Job ids that must finish first
        #[arg(short, long = "depends-on")]
        depends_on: Vec<String>,

        /// Override retry.max_retries for this job
        #[arg(long)]
        max_retries: Option<u32>,

        /// Execution timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Dedupe key; a live job with the same key is returned instead
        #[arg(short, long)]
        key: Option<String>,

        /// Execution lane (interactive, background)
        #[arg(short, long, default_value_t = Lane::Background)]
        lane: Lane,

        /// Run in the interactive lane regardless of --lane
        #[arg(short, long)]
        urgent: bool,
    },

    /// List jobs
    List {
        /// Filter by status (pending, ready, running, done, failed-transient, failed-terminal, cancelled)
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Show only jobs with this name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Get status of a specific job
    Status {
        /// Job ID to check
        id: String,

        /// Show detailed information
        #[arg(short, long)]
        detailed: bool,
    },

    /// Cancel a job
    Cancel {
        /// Job ID to cancel
        id: String,
    },
}
