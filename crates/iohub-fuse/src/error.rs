use thiserror::Error;

/// Errors surfaced to the kernel by the passthrough filesystem.
#[derive(Debug, Error)]
pub enum FuseError {
    /// Error from the backing store; its errno is passed through.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The kernel referred to an inode this daemon never handed out.
    #[error("Inode not found: {ino}")]
    NotFound { ino: u64 },

    /// The kernel referred to a file handle that is not open.
    #[error("Bad file handle: {fh}")]
    BadHandle { fh: u64 },

    /// A request carried an argument the backing store cannot express.
    #[error("Invalid argument: {msg}")]
    InvalidArgument { msg: String },

    /// Mounting the filesystem failed.
    #[error("Mount failed at {mountpoint}: {reason}")]
    MountFailed { mountpoint: String, reason: String },
}

/// Result alias for filesystem operations.
pub type Result<T> = std::result::Result<T, FuseError>;

impl FuseError {
    /// Errno to send back to the kernel.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            FuseError::Io(e) => io_errno(e),
            FuseError::NotFound { .. } => ENOENT,
            FuseError::BadHandle { .. } => EBADF,
            FuseError::InvalidArgument { .. } => EINVAL,
            FuseError::MountFailed { .. } => EIO,
        }
    }
}

/// Raw errno carried by `e`, or `EIO` when there is none.
pub fn io_errno(e: &std::io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}
