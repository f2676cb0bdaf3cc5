//! # streakust
//!
//! A terminal task tracker built around a daily streak. Add dated tasks, check
//! them off, and keep every eligible task done each day to grow a streak of up
//! to 30 days.
//!
//! ## Usage
//!
//! ```bash
//! # Add tasks (date defaults to today, time to all day)
//! streakust add "Morning run" --time 07:00
//! streakust add "Dentist" --date 2025-12-01 --time 14:30
//!
//! # Today's tasks, progress and streak
//! streakust list
//!
//! # Check a task off (again to uncheck)
//! streakust done <ID>
//!
//! # Daily routine
//! streakust routine add "Read 20 pages" --time 21:00
//! streakust routine apply
//!
//! # Backups
//! streakust export --output backup.json
//! streakust import backup.json
//! ```
//!
//! ## Data Storage
//!
//! Records are saved as JSON in your local data directory
//! (`~/.local/share/streakust` on Linux). Override it with `STREAKUST_HOME`.
//!
//! ## Sharing Between Machines
//!
//! Point `[remote] root` in `config.toml` (or `STREAKUST_REMOTE_ROOT`) at a
//! shared folder. Every save is mirrored there, and `streakust watch` merges
//! changes made elsewhere as they happen.

use std::io;
use std::path::PathBuf;

use chrono::Local;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use streakust::app::Tracker;
use streakust::commands::*;
use streakust::config::Config;
use streakust::error::Result;
use streakust::models::TaskId;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "streakust")]
#[command(about = "Daily task tracker with a 30-day streak", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        /// Task text (quoted if it has spaces)
        text: String,
        /// Date in YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<String>,
        /// Time in HH:MM (defaults to all day)
        #[arg(short, long)]
        time: Option<String>,
    },
    /// List tasks with today's progress and the streak
    List {
        /// Show every task, including future ones
        #[arg(short, long)]
        all: bool,
        /// Day to show instead of today, YYYY-MM-DD
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Check a task off for today, or uncheck it
    Done {
        id: TaskId,
    },
    /// Remove a task
    Remove {
        id: TaskId,
    },
    /// Manage the daily routine
    Routine {
        #[command(subcommand)]
        command: RoutineCommands,
    },
    /// Show the streak
    Streak,
    /// Export all data to a JSON file
    Export {
        /// Output file (defaults to streakust-backup-<date>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Replace all data with the content of an export file
    Import {
        file: PathBuf,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Restore the latest automatic backup
    RestoreBackup {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Merge with the remote mirror and push the result
    Sync,
    /// Merge remote changes as they happen
    Watch,
    /// Show storage and sync status
    Status,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum RoutineCommands {
    /// Add a routine entry
    Add {
        text: String,
        /// Time in HH:MM (defaults to all day)
        #[arg(short, long)]
        time: Option<String>,
    },
    /// List routine entries
    List,
    /// Remove a routine entry
    Remove {
        id: TaskId,
    },
    /// Remove every routine entry
    Clear {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Add the routine's tasks to a day
    Apply {
        /// Day in YYYY-MM-DD (defaults to today)
        #[arg(short, long)]
        date: Option<String>,
    },
}

fn init_tracing() {
    // Warnings by default so degraded sync is visible; RUST_LOG overrides.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

async fn run(command: Commands) -> Result<()> {
    if let Commands::Completions { shell } = command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "streakust", &mut io::stdout());
        return Ok(());
    }

    let config = Config::load_default()?;
    let today = Local::now().date_naive();
    let mut tracker = Tracker::open(&config, today).await?;

    let result = match command {
        Commands::Add { text, date, time } => cmd_add(&mut tracker, &text, date.as_deref(), time.as_deref(), today, false),
        Commands::List { all, date } => cmd_list(&tracker, all, date.as_deref(), today),
        Commands::Done { id } => cmd_done(&mut tracker, id, today, false),
        Commands::Remove { id } => cmd_remove(&mut tracker, id, false),
        Commands::Routine { command } => match command {
            RoutineCommands::Add { text, time } => cmd_routine_add(&mut tracker, &text, time.as_deref(), false),
            RoutineCommands::List => {
                cmd_routine_list(&tracker);
                Ok(())
            }
            RoutineCommands::Remove { id } => cmd_routine_remove(&mut tracker, id, false),
            RoutineCommands::Clear { force } => cmd_routine_clear(&mut tracker, force, false),
            RoutineCommands::Apply { date } => cmd_routine_apply(&mut tracker, date.as_deref(), today, false),
        },
        Commands::Streak => {
            cmd_streak(&tracker);
            Ok(())
        }
        Commands::Export { output } => cmd_export(&tracker, output, today, false).map(|_| ()),
        Commands::Import { file, force } => cmd_import(&mut tracker, &file, force, false),
        Commands::RestoreBackup { force } => cmd_restore_backup(&mut tracker, force, false),
        Commands::Sync => cmd_sync(&mut tracker, false),
        Commands::Watch => {
            let status = cmd_watch(tracker, false).await?;
            println!("Remote: {}", status);
            return Ok(());
        }
        Commands::Status => {
            cmd_status(&tracker);
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    };

    // Pending remote writes go out even when the command failed.
    let status = tracker.shutdown().await;
    if let streakust::app::SyncStatus::Degraded(reason) = &status {
        eprintln!("Warning: changes saved locally only ({})", reason);
    }
    result
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::List { all: false, date: None });
    if let Err(e) = run(command).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
