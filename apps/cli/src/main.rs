//! LexSync CLI — change-detection ingestion for regulation sources.
//!
//! Runs weekly refresh passes over configured jurisdiction sources and
//! keeps an append-only version history plus a semantic index in sync.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
