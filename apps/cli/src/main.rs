//! Notecast CLI: turn notebook sources into narrated audio and short video.
//!
//! Manages notebooks and sources, runs generation jobs through the pipeline,
//! and inspects the job ledger.

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
