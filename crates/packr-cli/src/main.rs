mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "packr",
    about = "Package Node.js services into deterministic zip archives"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve files and write one archive per packaging unit
    Package {
        /// Service directory containing packr.toml (default: current directory)
        #[arg(long, short = 'd', default_value = ".")]
        dir: PathBuf,
        /// Only package the unit with this bundle name
        #[arg(long, short = 'u')]
        unit: Option<String>,
        /// Print full pattern and file lists for each unit as JSON
        #[arg(long)]
        report: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Package { dir, unit, report } => {
            commands::package(&dir, unit.as_deref(), report).await?
        }
    }

    Ok(())
}
