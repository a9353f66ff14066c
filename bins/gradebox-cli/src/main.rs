mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gradebox-cli")]
#[command(about = "Gradebox CLI - Run snippets, grade exercises locally, manage the exercise catalog", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Python file once in the sandbox
    Run {
        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// File whose contents are fed to stdin
        #[arg(short, long)]
        stdin: Option<PathBuf>,

        /// Timeout in seconds (defaults to GRADEBOX_DEFAULT_TIMEOUT_SECS)
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Grade a solution file against an exercise definition file
    Validate {
        /// Exercise definition JSON (one definition or an array)
        #[arg(short, long)]
        exercise: PathBuf,

        /// Solution source file
        #[arg(short, long)]
        file: PathBuf,

        /// Exercise id, required when the definition file holds several
        #[arg(long)]
        id: Option<String>,
    },

    /// Check an exercise definition: tests present, reference solution passing
    Check {
        /// Exercise definition JSON (one definition or an array)
        #[arg(short, long)]
        exercise: PathBuf,

        /// Exercise id, required when the definition file holds several
        #[arg(long)]
        id: Option<String>,
    },

    /// Publish exercise definitions into the Redis catalog
    Publish {
        /// Exercise definition JSON (one definition or an array)
        #[arg(short, long)]
        exercise: PathBuf,

        /// Redis URL (defaults to REDIS_URL)
        #[arg(long)]
        redis_url: Option<String>,
    },

    /// Remove exercises from the Redis catalog
    Unpublish {
        /// Exercise ids to remove
        #[arg(required = true)]
        ids: Vec<String>,

        /// Redis URL (defaults to REDIS_URL)
        #[arg(long)]
        redis_url: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            stdin,
            timeout,
        } => {
            commands::run_file(&file, stdin.as_deref(), timeout).await?;
        }
        Commands::Validate { exercise, file, id } => {
            commands::validate_file(&exercise, &file, id.as_deref()).await?;
        }
        Commands::Check { exercise, id } => {
            commands::check_exercise(&exercise, id.as_deref()).await?;
        }
        Commands::Publish {
            exercise,
            redis_url,
        } => {
            commands::publish(&exercise, redis_url.as_deref()).await?;
        }
        Commands::Unpublish { ids, redis_url } => {
            commands::unpublish(&ids, redis_url.as_deref()).await?;
        }
    }

    Ok(())
}
