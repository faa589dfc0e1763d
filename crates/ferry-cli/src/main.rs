mod commands;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ferry",
    version,
    about = "Migrate groups and projects between instances"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a migration until no more progress is possible
    Run {
        /// Path to migration YAML file
        migration: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate migration configuration, stores and source URL
    Check {
        /// Path to migration YAML file
        migration: PathBuf,
    },
    /// Show the persisted summary without running anything
    Status {
        /// Path to migration YAML file
        migration: PathBuf,
        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_level);

    match cli.command {
        Commands::Run { migration, json } => commands::run::execute(&migration, json).await,
        Commands::Check { migration } => commands::check::execute(&migration).await,
        Commands::Status { migration, json } => commands::status::execute(&migration, json),
    }
}
