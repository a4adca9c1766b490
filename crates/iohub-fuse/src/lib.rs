#![warn(missing_docs)]

//! iohub passthrough filesystem.
//!
//! Exposes a backing directory through FUSE, admitting every read and write
//! through the per-uid throttle in `iohub-throttle`.

pub mod attr;
pub mod backing;
pub mod cli;
pub mod daemon;
pub mod dataplane;
pub mod error;
pub mod filesystem;
pub mod flags;
pub mod handles;
pub mod inode;
pub mod mount;

pub use error::{FuseError, Result};
pub use filesystem::IoHubFs;
