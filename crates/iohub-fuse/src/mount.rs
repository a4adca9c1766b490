//! Mount options and mount point checks.
//!
//! Every iohub mount carries `default_permissions` and `allow_other`.
//! Page-cache bypass (`direct_io`) is set per open file in the open reply.
//! `hard_remove` has no option: open files are addressed by handle, not by
//! path, so unlinking an open file needs no hiding.

use std::path::Path;
use thiserror::Error;

/// Name reported as the mount source.
pub const FS_NAME: &str = "iohub";

/// Options the user may add with `-o`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
    /// Unmount when the daemon exits.
    pub auto_unmount: bool,
    /// Read-only mount.
    pub ro: bool,
    /// Ignore device files.
    pub nodev: bool,
    /// Ignore setuid bits.
    pub nosuid: bool,
    /// Disallow execution.
    pub noexec: bool,
    /// Do not update access times.
    pub noatime: bool,
    /// Synchronous I/O.
    pub sync: bool,
    /// Synchronous directory updates.
    pub dirsync: bool,
}

/// Errors that can occur during mount operations.
#[derive(Debug, Error)]
pub enum MountError {
    /// Path does not exist.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// Path is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(String),

    /// Permission denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid option.
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for MountError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => MountError::PathNotFound(e.to_string()),
            std::io::ErrorKind::PermissionDenied => MountError::PermissionDenied(e.to_string()),
            _ => MountError::IoError(e.to_string()),
        }
    }
}

/// Validate a mountpoint path.
pub fn validate_mountpoint(path: &Path) -> Result<(), MountError> {
    if !path.exists() {
        return Err(MountError::PathNotFound(path.display().to_string()));
    }

    if !path.is_dir() {
        return Err(MountError::NotADirectory(path.display().to_string()));
    }

    Ok(())
}

/// Validate the backing root: an existing directory this process can list.
pub fn validate_root(path: &Path) -> Result<(), MountError> {
    validate_mountpoint(path)?;
    std::fs::read_dir(path)?;
    Ok(())
}

/// Parse mount options from a comma-separated string.
///
/// The always-on options (`default_permissions`, `allow_other`,
/// `direct_io`, `hard_remove`) are accepted and ignored.
pub fn parse_mount_options(opts_str: &str) -> Result<MountOptions, MountError> {
    let mut options = MountOptions::default();

    for opt in opts_str.split(',') {
        match opt.trim() {
            "auto_unmount" => options.auto_unmount = true,
            "ro" => options.ro = true,
            "rw" => options.ro = false,
            "nodev" => options.nodev = true,
            "dev" => options.nodev = false,
            "nosuid" => options.nosuid = true,
            "suid" => options.nosuid = false,
            "noexec" => options.noexec = true,
            "exec" => options.noexec = false,
            "noatime" => options.noatime = true,
            "atime" => options.noatime = false,
            "sync" => options.sync = true,
            "async" => options.sync = false,
            "dirsync" => options.dirsync = true,
            "default_permissions" | "allow_other" | "direct_io" | "hard_remove" | "" => {}
            other => return Err(MountError::InvalidOption(other.to_string())),
        }
    }

    Ok(options)
}

/// Full fuser option list: the mandatory options followed by the user's.
pub fn options_to_fuser(opts: &MountOptions) -> Vec<fuser::MountOption> {
    use fuser::MountOption;

    let mut fuser_opts = vec![
        MountOption::FSName(FS_NAME.to_string()),
        MountOption::Subtype(FS_NAME.to_string()),
        MountOption::DefaultPermissions,
        MountOption::AllowOther,
    ];

    let flags = [
        (opts.auto_unmount, MountOption::AutoUnmount),
        (opts.ro, MountOption::RO),
        (opts.nodev, MountOption::NoDev),
        (opts.nosuid, MountOption::NoSuid),
        (opts.noexec, MountOption::NoExec),
        (opts.noatime, MountOption::NoAtime),
        (opts.sync, MountOption::Sync),
        (opts.dirsync, MountOption::DirSync),
    ];
    fuser_opts.extend(flags.into_iter().filter(|(on, _)| *on).map(|(_, o)| o));

    fuser_opts
}
