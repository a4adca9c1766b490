//! Command line.

use std::path::PathBuf;

use clap::Parser;

/// Mount `ROOT` at `MOUNTPOINT` with per-uid I/O throttling.
#[derive(Debug, Parser)]
#[command(name = "iohub")]
#[command(about = "Throttled FUSE passthrough filesystem", long_about = None)]
pub struct Cli {
    /// Throttle configuration file (.toml or .json).
    #[arg(short, long, env = "IOHUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Extra mount options, comma separated.
    #[arg(short = 'o', long = "options")]
    pub options: Option<String>,

    /// Override the throttling period length.
    #[arg(long)]
    pub period_secs: Option<u64>,

    /// Directory whose contents are exposed.
    pub root: PathBuf,

    /// Where to mount.
    pub mountpoint: PathBuf,
}
