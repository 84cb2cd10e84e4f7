//! CLI entry point: reads a trade instruction and per-account credentials,
//! runs one `Run` to completion, and prints the resulting summary as JSON.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use perp_ladder_executor::engine::cancel::StdinCancellationSource;
use perp_ladder_executor::{Config, Credentials, Run, TradeInstruction};

#[derive(Parser)]
#[command(name = "perp-ladder-executor", version, about = "Multi-account perpetual-futures ladder executor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one trade instruction across the configured accounts.
    Run {
        /// Path to a JSON file with `{ "credentials": {...}, "instruction": {...} }`.
        /// Reads from stdin when omitted.
        #[arg(long)]
        input: Option<String>,
    },
}

/// The on-disk / stdin input document: credentials keyed by account name,
/// plus the trade instruction, folded into one JSON body.
#[derive(Deserialize)]
struct RunInput {
    credentials: HashMap<String, Credentials>,
    instruction: TradeInstruction,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { input } => run_command(input).await,
    }
}

async fn run_command(input_path: Option<String>) -> Result<()> {
    let raw = match input_path {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading input file {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading run input from stdin")?;
            buf
        }
    };

    let input: RunInput = serde_json::from_str(&raw).context("parsing run input JSON")?;
    let config = Config::from_env();

    let run = Run::new(
        config,
        input.credentials,
        input.instruction,
        Arc::new(StdinCancellationSource),
    )?;

    let summary = run.execute().await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perp_ladder_executor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
