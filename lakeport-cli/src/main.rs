//! Lakeport CLI: run retrieval, publishing, validation and metadata requests
//! from JSON request files.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Lakeport: batch data movement from lakehouse and SQL sources
#[derive(Parser, Debug)]
#[command(name = "lakeport", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (defaults to ./lakeport.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors to stderr
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Extract a dataset into a destination's staging area or the warehouse
    Retrieve {
        /// Request JSON file, or `-` for stdin
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Promote staged files or provision warehouse access
    Publish {
        /// Request JSON file, or `-` for stdin
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Check that a source is reachable and a destination is usable
    Validate {
        /// Request JSON file, or `-` for stdin
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Describe the tables of a source schema
    Metadata {
        /// Request JSON file, or `-` for stdin
        #[arg(short, long)]
        request: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let settings = lakeport_core::load_settings(cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr; RUST_LOG wins when set
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    // JSON file layer for structured logging
    let _ = std::fs::create_dir_all(&settings.log_dir);
    let file_appender = tracing_appender::rolling::daily(&settings.log_dir, "lakeport.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let service = lakeport_core::Service::from_settings(settings);
    let envelope = commands::handle_command(&service, cli.command).await;
    let failed = envelope.status == lakeport_core::request::Status::Error;

    println!("{}", serde_json::to_string_pretty(&envelope)?);

    if failed {
        // Flush the file appender before exiting.
        drop(_guard);
        std::process::exit(1);
    }
    Ok(())
}
