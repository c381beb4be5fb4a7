use clap::Parser;

use quorate::cli::Cli;
use quorate::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    Cli::parse().execute().await?;
    Ok(())
}
