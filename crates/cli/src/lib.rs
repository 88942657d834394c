pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "tutorbot",
    about = "Tutorbot operator CLI",
    long_about = "Apply migrations, check readiness and prune the processed-message ledger.",
    after_help = "Examples:\n  tutorbot migrate\n  tutorbot doctor --json\n  \
                  tutorbot purge --older-than-hours 72"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, collaborator wiring, DB connectivity and schema version")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Delete processed-message records older than the retention window")]
    Purge {
        #[arg(long, help = "Override idempotency.retention_hours for this run")]
        older_than_hours: Option<u64>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Purge { older_than_hours } => commands::purge::run(older_than_hours),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
