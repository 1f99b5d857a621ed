//! attain CLI: grade students against a competency grading server.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use attain_core::model::{Attainment, ClassId, CriterionId, DisciplineId, SnapshotId, StudentId};

mod commands;

#[derive(Parser)]
#[command(name = "attain", version, about = "Competency evaluation sessions")]
struct Cli {
    /// Config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a starter attain.toml
    Init,

    /// Show a class, its students and the evaluation status of each discipline
    Class {
        /// Class id
        class: u64,
    },

    /// Look up the snapshot of a discipline without creating one
    Resolve {
        #[arg(long)]
        class: u64,
        #[arg(long)]
        discipline: u64,
    },

    /// Start evaluation of a discipline (creates its snapshot once)
    Snapshot {
        #[arg(long)]
        class: u64,
        #[arg(long)]
        discipline: u64,
    },

    /// Show one student's evaluation sheet
    Show {
        #[arg(long)]
        student: u64,
        #[arg(long)]
        snapshot: u64,
    },

    /// Record one criterion
    Mark {
        #[arg(long)]
        student: u64,
        #[arg(long)]
        snapshot: u64,
        #[arg(long)]
        criterion: u64,
        /// attained, not-attained or unset
        #[arg(long)]
        value: Attainment,
        /// Free-text note; the stored note is kept when omitted
        #[arg(long)]
        note: Option<String>,
    },

    /// Set the same value on every criterion of a student's sheet
    MarkAll {
        #[arg(long)]
        student: u64,
        #[arg(long)]
        snapshot: u64,
        /// attained, not-attained or unset
        #[arg(long)]
        value: Attainment,
    },

    /// Lock a student's evaluation and compute the result
    Finalize {
        #[arg(long)]
        student: u64,
        #[arg(long)]
        snapshot: u64,
    },

    /// Unlock a finalized evaluation
    Reopen {
        #[arg(long)]
        student: u64,
        #[arg(long)]
        snapshot: u64,
    },

    /// Finalize every open student of a class
    FinalizeClass {
        #[arg(long)]
        class: u64,
        #[arg(long)]
        discipline: u64,
    },

    /// Print the final results of a class
    Report {
        #[arg(long)]
        class: u64,
        #[arg(long)]
        discipline: u64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("attain=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let result = match cli.command {
        Commands::Init => commands::init::execute(),
        Commands::Class { class } => commands::class::execute(config, ClassId(class)).await,
        Commands::Resolve { class, discipline } => {
            commands::resolve::execute(config, ClassId(class), DisciplineId(discipline)).await
        }
        Commands::Snapshot { class, discipline } => {
            commands::snapshot::execute(config, ClassId(class), DisciplineId(discipline)).await
        }
        Commands::Show { student, snapshot } => {
            commands::show::execute(config, StudentId(student), SnapshotId(snapshot)).await
        }
        Commands::Mark {
            student,
            snapshot,
            criterion,
            value,
            note,
        } => {
            commands::mark::execute(
                config,
                StudentId(student),
                SnapshotId(snapshot),
                CriterionId(criterion),
                value,
                note,
            )
            .await
        }
        Commands::MarkAll {
            student,
            snapshot,
            value,
        } => {
            commands::mark_all::execute(config, StudentId(student), SnapshotId(snapshot), value)
                .await
        }
        Commands::Finalize { student, snapshot } => {
            commands::finalize::execute(config, StudentId(student), SnapshotId(snapshot)).await
        }
        Commands::Reopen { student, snapshot } => {
            commands::reopen::execute(config, StudentId(student), SnapshotId(snapshot)).await
        }
        Commands::FinalizeClass { class, discipline } => {
            commands::finalize_class::execute(config, ClassId(class), DisciplineId(discipline))
                .await
        }
        Commands::Report {
            class,
            discipline,
            json,
        } => {
            commands::report::execute(config, ClassId(class), DisciplineId(discipline), json).await
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}
