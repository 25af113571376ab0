use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod output;
mod shutdown;

use commands::{CliError, run_command};

#[derive(Parser, Debug)]
#[command(name = "dumpvault", version)]
#[command(about = "dumpvault - MySQL backup, restore and scheduling")]
struct Cli {
    /// Configuration file (TOML); `DUMPVAULT_*` variables override it
    #[arg(long, short, global = true, env = "DUMPVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Take a full backup and wait for it to finish
    Backup {
        /// Database to dump
        database: String,
        /// full-daily, full-weekly, full-monthly or full-manual
        #[arg(long, default_value = "full-manual")]
        kind: String,
        /// Restrict the dump to these tables
        #[arg(long = "table", short = 't')]
        tables: Vec<String>,
    },
    /// Capture rows of one table changed since the last backup
    Incremental {
        database: String,
        table: String,
    },
    /// Restore a completed backup, optionally only some tables
    Restore {
        job_id: i64,
        #[arg(long = "table", short = 't')]
        tables: Vec<String>,
    },
    /// Write selected tables of a backup to a plain SQL file
    Extract {
        job_id: i64,
        #[arg(long = "table", short = 't', required = true)]
        tables: Vec<String>,
        /// Destination file
        #[arg(long, short)]
        output: PathBuf,
    },
    /// List backups, newest first
    List {
        #[arg(long)]
        database: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        /// pending, running, completed or failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show a backup's status, or its restore status with `--restore`
    Status {
        job_id: i64,
        #[arg(long)]
        restore: bool,
    },
    /// Delete a backup's artifact and record
    Delete { job_id: i64 },
    /// Apply the retention windows now
    Cleanup,
    /// Manage cron schedules
    Schedule {
        #[command(subcommand)]
        schedule_command: ScheduleCommands,
    },
    /// Run the scheduler until SIGINT or SIGTERM
    Daemon {
        /// Rewrite Prometheus metrics to this file on every scheduler refresh
        #[arg(long)]
        metrics_file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ScheduleCommands {
    /// Add a schedule
    Add {
        database: String,
        /// Backup kind the schedule fires
        #[arg(long)]
        kind: String,
        /// Five-field (minute first) or six/seven-field cron expression
        #[arg(long)]
        cron: String,
        /// Tables; required for incremental schedules
        #[arg(long = "table", short = 't')]
        tables: Vec<String>,
        /// Create the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// List schedules
    List {
        #[arg(long)]
        enabled_only: bool,
    },
    /// Remove a schedule
    Remove { id: i64 },
    /// Enable a schedule
    Enable { id: i64 },
    /// Disable a schedule
    Disable { id: i64 },
    /// Change a schedule's cron expression or tables
    Update {
        id: i64,
        #[arg(long)]
        cron: Option<String>,
        #[arg(long = "table", short = 't')]
        tables: Vec<String>,
    },
    /// Fire a schedule once, now
    Run { id: i64 },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_command(cli).await {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {e}");
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &CliError) -> i32 {
    match error {
        CliError::Failed(_) => 2,
        _ => 1,
    }
}
