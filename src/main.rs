// semantic-stream - Streaming generation client with a semantic response cache
// Author: kelexine (https://github.com/kelexine)

use anyhow::Result;
use clap::Parser;
use semantic_stream::cli::{commands, Args};
use semantic_stream::config::AppConfig;
use semantic_stream::metrics;
use semantic_stream::utils::logging;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Phase 1: Load configuration
    let mut config = AppConfig::load(args.config.as_deref())?;
    if args.no_cache {
        config.cache.enabled = false;
    }

    // Phase 2: Initialize logging
    logging::init(&config.logging)?;
    info!("Starting semantic-stream v{}", env!("CARGO_PKG_VERSION"));

    // Phase 3: Run the command
    let result = commands::run(args.command, &config).await;

    // Phase 4: Report metrics, even when the command failed
    if args.metrics {
        eprintln!("{}", metrics::gather_metrics());
    }

    result?;
    Ok(())
}
