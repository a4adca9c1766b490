//! Inode numbers handed to the kernel.
//!
//! The backing store is addressed by path, so each inode simply names a
//! path relative to the backing root. The root directory is inode 1 and
//! maps to the empty relative path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// FUSE inode number.
pub type InodeId = u64;

/// Inode number of the mount root.
pub const ROOT_INODE: InodeId = 1;

#[derive(Debug, Clone)]
struct InodeEntry {
    path: PathBuf,
    lookups: u64,
}

/// Two-way mapping between inode numbers and relative paths.
#[derive(Debug)]
pub struct InodeTable {
    entries: HashMap<InodeId, InodeEntry>,
    by_path: HashMap<PathBuf, InodeId>,
    next_ino: InodeId,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Table holding only the root.
    pub fn new() -> Self {
        let mut table = InodeTable {
            entries: HashMap::new(),
            by_path: HashMap::new(),
            next_ino: ROOT_INODE + 1,
        };
        table.entries.insert(
            ROOT_INODE,
            InodeEntry {
                path: PathBuf::new(),
                lookups: 1,
            },
        );
        table.by_path.insert(PathBuf::new(), ROOT_INODE);
        table
    }

    /// Relative path of `ino`.
    pub fn path(&self, ino: InodeId) -> Option<&Path> {
        self.entries.get(&ino).map(|e| e.path.as_path())
    }

    /// Inode currently bound to `path`, if any.
    pub fn ino_of(&self, path: &Path) -> Option<InodeId> {
        self.by_path.get(path).copied()
    }

    /// Bind `path` to an inode (reusing an existing binding) and count one
    /// kernel lookup against it.
    pub fn lookup(&mut self, path: &Path) -> InodeId {
        if let Some(&ino) = self.by_path.get(path) {
            if let Some(entry) = self.entries.get_mut(&ino) {
                entry.lookups += 1;
            }
            return ino;
        }

        let ino = self.next_ino;
        self.next_ino += 1;
        self.entries.insert(
            ino,
            InodeEntry {
                path: path.to_path_buf(),
                lookups: 1,
            },
        );
        self.by_path.insert(path.to_path_buf(), ino);
        ino
    }

    /// Drop `nlookup` kernel references. The inode is released once none
    /// remain. The root is never released.
    pub fn forget(&mut self, ino: InodeId, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let released = match self.entries.get_mut(&ino) {
            Some(entry) => {
                entry.lookups = entry.lookups.saturating_sub(nlookup);
                entry.lookups == 0
            }
            None => false,
        };
        if released {
            if let Some(entry) = self.entries.remove(&ino) {
                if self.by_path.get(&entry.path) == Some(&ino) {
                    self.by_path.remove(&entry.path);
                }
            }
        }
    }

    /// Unbind `path` after it was removed from the backing store. The inode
    /// itself lives on until the kernel forgets it.
    pub fn unlink(&mut self, path: &Path) {
        self.by_path.remove(path);
    }

    /// Move `from` (and everything beneath it) to `to`. A binding that
    /// already existed at `to` is displaced.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        self.by_path.remove(to);

        let moved: Vec<(PathBuf, InodeId)> = self
            .by_path
            .iter()
            .filter(|(p, _)| p.starts_with(from))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();

        for (old, ino) in moved {
            let suffix = match old.strip_prefix(from) {
                Ok(s) => s.to_path_buf(),
                Err(_) => continue,
            };
            let new = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            self.by_path.remove(&old);
            if let Some(entry) = self.entries.get_mut(&ino) {
                entry.path = new.clone();
            }
            self.by_path.insert(new, ino);
        }
    }

    /// Number of live inodes, root included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Never true: the root is always present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
