#![warn(missing_docs)]
//! iohub FUSE mount daemon

use clap::Parser;
use iohub_fuse::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::info!("iohub daemon starting...");

    iohub_fuse::daemon::run(cli).await
}
