//! Daemon startup and shutdown.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use iohub_throttle::ThrottleConfig;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::backing::BackingStore;
use crate::cli::Cli;
use crate::dataplane::DataPlane;
use crate::error::FuseError;
use crate::filesystem::IoHubFs;
use crate::mount::{options_to_fuser, parse_mount_options, validate_mountpoint, validate_root};

/// Configuration from `cli.config` if given, else the built-in defaults,
/// with the command line overrides applied.
pub fn load_config(cli: &Cli) -> anyhow::Result<ThrottleConfig> {
    let mut config = match &cli.config {
        Some(path) => ThrottleConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => ThrottleConfig::default(),
    };
    if let Some(secs) = cli.period_secs {
        config.period_secs = secs;
    }
    Ok(config)
}

/// Detach from the launch directory, pass modes through unmasked and
/// survive writes to closed pipes.
pub fn prepare_process() -> io::Result<()> {
    std::env::set_current_dir("/")?;
    unsafe {
        libc::umask(0);
        if libc::signal(libc::SIGPIPE, libc::SIG_IGN) == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    path.canonicalize()
        .with_context(|| format!("resolving {}", path.display()))
}

/// Mount and serve until ctrl-c.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    let gate = Arc::new(config.build_gate().context("building throttle gate")?);
    info!(
        "throttling {} uids plus fallback, {}s periods",
        config.allocations.len(),
        config.period_secs
    );
    for alloc in gate.registry().iter() {
        debug!("uid {} may move {} bytes per period", alloc.identity, alloc.full_quota_bytes);
    }

    let root = absolute(&cli.root)?;
    let mountpoint = absolute(&cli.mountpoint)?;
    validate_root(&root).with_context(|| format!("backing root {}", root.display()))?;
    validate_mountpoint(&mountpoint)
        .with_context(|| format!("mount point {}", mountpoint.display()))?;
    let options = parse_mount_options(cli.options.as_deref().unwrap_or(""))?;

    prepare_process().context("preparing process")?;

    let fs = IoHubFs::new(
        BackingStore::new(&root),
        DataPlane::new(Arc::clone(&gate)),
        Handle::current(),
    );
    let session = fuser::spawn_mount2(fs, &mountpoint, &options_to_fuser(&options)).map_err(
        |e| FuseError::MountFailed {
            mountpoint: mountpoint.display().to_string(),
            reason: e.to_string(),
        },
    )?;
    info!("{} mounted at {}", root.display(), mountpoint.display());

    tokio::signal::ctrl_c().await?;
    info!("unmounting {}", mountpoint.display());
    drop(session);

    let stats = serde_json::to_string(&gate.stats().snapshot())?;
    info!("throttle stats: {}", stats);
    Ok(())
}
