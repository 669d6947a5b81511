use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use photo_core::config;
use photo_resizer::commands;
use std::path::PathBuf;
use storage::Page;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        None => commands::run_location(&cfg, &cli.location, cli.json).await,
        Some(Commands::Stats { location, json }) => {
            commands::stats(&cfg, location.as_deref(), json).await
        }
        Some(Commands::History {
            page,
            per_page,
            location,
            json,
        }) => commands::history(&cfg, Page { page, per_page }, location.as_deref(), json).await,
        Some(Commands::Retry { path, json }) => commands::retry(&cfg, &path, json).await,
        Some(Commands::Compact { json }) => commands::compact(&cfg, json).await,
    }
}

/// Logs go to stderr so `--json` output stays clean. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Parser)]
#[command(name = "photo-resizer")]
#[command(about = "Resize photo collections for digital frames", long_about = None)]
struct Cli {
    /// Location key to process
    #[arg(default_value = "home")]
    location: String,

    /// Path to config TOML
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Output JSON summary
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate numbers from the ledger
    Stats {
        /// Restrict to one location's output
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Recent attempts, newest first
    History {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 50)]
        per_page: u32,
        /// Restrict to one location's output
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Run one file through the converter again
    Retry {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Collapse repeated ledger rows and vacuum
    Compact {
        #[arg(long)]
        json: bool,
    },
}
