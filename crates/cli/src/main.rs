//! # sqlrag-cli: A CLI for `sqlrag`
//!
//! Runs the pipeline in-process against the configured database, without a
//! server. Every command prints its result as pretty JSON on stdout.

mod commands;

use anyhow::Result;
use clap::Parser;
use commands::Commands;
use std::fs::File;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "sqlrag", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to a config.yml; defaults to the server's bundled one.
    #[arg(long, global = true, env = "SQLRAG_CONFIG")]
    config: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to a file so stdout stays machine-readable.
    let log_file = File::create("sqlrag-cli.log")?;
    let subscriber = fmt::Subscriber::builder()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    if let Err(e) = commands::run(cli.config.as_deref(), &cli.command).await {
        eprintln!("Command failed: {e}");
        std::process::exit(1);
    }
    Ok(())
}
