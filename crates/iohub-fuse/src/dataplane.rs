//! Throttled data path.
//!
//! Reads and writes are admitted by the gate before any bytes move. These
//! calls may sleep for up to one throttling period, so they run on the
//! blocking pool, never on the FUSE session thread.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::AsRawFd;
use std::sync::Arc;

use iohub_throttle::{Identity, MonotonicTimeSource, ThrottleGate, TimeSource};
use tracing::debug;

/// Byte-moving operations on open backing files.
#[derive(Debug)]
pub struct DataPlane<T: TimeSource = MonotonicTimeSource> {
    gate: Arc<ThrottleGate<T>>,
}

impl<T: TimeSource> DataPlane<T> {
    pub fn new(gate: Arc<ThrottleGate<T>>) -> Self {
        DataPlane { gate }
    }

    /// The gate every transfer is admitted by.
    pub fn gate(&self) -> &Arc<ThrottleGate<T>> {
        &self.gate
    }

    /// Read up to `size` bytes at `offset` for `uid`. Fewer bytes are
    /// returned only at end of file.
    pub fn read(&self, uid: Identity, file: &File, offset: u64, size: u32) -> io::Result<Vec<u8>> {
        self.gate.admit(uid, size as u64);

        let mut buf = vec![0u8; size as usize];
        let mut filled = 0;
        while filled < buf.len() {
            match file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        buf.truncate(filled);
        debug!(uid, offset, size, read = filled, "read");
        Ok(buf)
    }

    /// Write all of `data` at `offset` for `uid`.
    pub fn write(&self, uid: Identity, file: &File, offset: u64, data: &[u8]) -> io::Result<u32> {
        self.gate.admit(uid, data.len() as u64);
        file.write_all_at(data, offset)?;
        debug!(uid, offset, size = data.len(), "write");
        Ok(data.len() as u32)
    }

    pub fn fsync(&self, file: &File, datasync: bool) -> io::Result<()> {
        if datasync {
            file.sync_data()
        } else {
            file.sync_all()
        }
    }

    pub fn ftruncate(&self, file: &File, size: u64) -> io::Result<()> {
        file.set_len(size)
    }

    pub fn fallocate(&self, file: &File, mode: i32, offset: i64, length: i64) -> io::Result<()> {
        let ret = unsafe {
            libc::fallocate(
                file.as_raw_fd(),
                mode,
                offset as libc::off_t,
                length as libc::off_t,
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}
