mod cli;
mod commands;
mod progress;

use anyhow::Context;
use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    utils::log::init_tracing("farmerlink=info,services=info")
        .context("failed to install tracing subscriber")?;

    let cli = Cli::parse();
    commands::run(cli).await
}
