//! Open file and directory handles.
//!
//! Handles are created and released on the FUSE session thread but read
//! from the blocking pool, so the table is a pair of `DashMap`s.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::backing::DirEntryInfo;

/// An open backing file.
#[derive(Debug)]
pub struct OpenFile {
    /// The backing file.
    pub file: File,
    /// Relative path at open time, for logging.
    pub path: PathBuf,
    /// Flags the file was opened with.
    pub flags: i32,
}

/// An open directory: a listing taken at `opendir` plus a descriptor for
/// `fsyncdir`.
#[derive(Debug)]
pub struct OpenDir {
    /// The backing directory.
    pub file: File,
    /// Entries in listing order; readdir offset `n` resumes at index `n`.
    pub entries: Vec<DirEntryInfo>,
}

/// Handle number to open file or directory.
#[derive(Debug)]
pub struct HandleTable {
    files: DashMap<u64, Arc<OpenFile>>,
    dirs: DashMap<u64, Arc<OpenDir>>,
    next_fh: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        HandleTable {
            files: DashMap::new(),
            dirs: DashMap::new(),
            next_fh: AtomicU64::new(1),
        }
    }

    fn alloc(&self) -> u64 {
        self.next_fh.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert_file(&self, file: OpenFile) -> u64 {
        let fh = self.alloc();
        self.files.insert(fh, Arc::new(file));
        fh
    }

    pub fn file(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.files.get(&fh).map(|f| Arc::clone(f.value()))
    }

    /// Forget `fh`. The backing file closes once in-flight requests holding
    /// it complete.
    pub fn remove_file(&self, fh: u64) -> Option<Arc<OpenFile>> {
        self.files.remove(&fh).map(|(_, f)| f)
    }

    pub fn insert_dir(&self, dir: OpenDir) -> u64 {
        let fh = self.alloc();
        self.dirs.insert(fh, Arc::new(dir));
        fh
    }

    pub fn dir(&self, fh: u64) -> Option<Arc<OpenDir>> {
        self.dirs.get(&fh).map(|d| Arc::clone(d.value()))
    }

    pub fn remove_dir(&self, fh: u64) -> Option<Arc<OpenDir>> {
        self.dirs.remove(&fh).map(|(_, d)| d)
    }

    pub fn open_files(&self) -> usize {
        self.files.len()
    }

    pub fn open_dirs(&self) -> usize {
        self.dirs.len()
    }
}
