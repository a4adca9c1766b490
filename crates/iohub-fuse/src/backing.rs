//! The backing directory tree.
//!
//! Every operation takes a path relative to the backing root and performs
//! the matching system call on `root/rel`. Errors are returned untouched so
//! their errno can be handed to the kernel as is.

use std::ffi::{CString, OsStr, OsString};
use std::fs::{self, DirBuilder, File, Metadata, OpenOptions, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, DirEntryExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use fuser::TimeOrNow;

use crate::attr::fuser_file_type;

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// Inode number in the backing filesystem.
    pub ino: u64,
    /// File name.
    pub name: OsString,
    /// File type.
    pub kind: fuser::FileType,
}

/// Filesystem statistics, as reported by `statvfs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub bsize: u32,
    pub namelen: u32,
    pub frsize: u32,
}

/// Directory tree the mount forwards to.
#[derive(Debug, Clone)]
pub struct BackingStore {
    root: PathBuf,
}

impl BackingStore {
    /// Forward to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BackingStore { root: root.into() }
    }

    /// The backing root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Backing path of `rel`.
    pub fn resolve(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    fn cpath(&self, rel: &Path) -> io::Result<CString> {
        cstring(self.resolve(rel).as_os_str())
    }

    /// `lstat`: symlinks are reported, not followed.
    pub fn stat(&self, rel: &Path) -> io::Result<Metadata> {
        fs::symlink_metadata(self.resolve(rel))
    }

    pub fn readlink(&self, rel: &Path) -> io::Result<PathBuf> {
        fs::read_link(self.resolve(rel))
    }

    pub fn mknod(&self, rel: &Path, mode: u32, rdev: u32) -> io::Result<()> {
        let path = self.cpath(rel)?;
        cvt(unsafe { libc::mknod(path.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) })
    }

    pub fn mkdir(&self, rel: &Path, mode: u32) -> io::Result<()> {
        DirBuilder::new().mode(mode).create(self.resolve(rel))
    }

    pub fn unlink(&self, rel: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(rel))
    }

    pub fn rmdir(&self, rel: &Path) -> io::Result<()> {
        fs::remove_dir(self.resolve(rel))
    }

    /// Create a symlink at `rel` whose target is stored verbatim.
    pub fn symlink(&self, target: &Path, rel: &Path) -> io::Result<()> {
        std::os::unix::fs::symlink(target, self.resolve(rel))
    }

    pub fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(self.resolve(from), self.resolve(to))
    }

    pub fn link(&self, existing: &Path, new: &Path) -> io::Result<()> {
        fs::hard_link(self.resolve(existing), self.resolve(new))
    }

    pub fn chmod(&self, rel: &Path, mode: u32) -> io::Result<()> {
        fs::set_permissions(self.resolve(rel), Permissions::from_mode(mode))
    }

    pub fn chown(&self, rel: &Path, uid: Option<u32>, gid: Option<u32>) -> io::Result<()> {
        std::os::unix::fs::chown(self.resolve(rel), uid, gid)
    }

    pub fn truncate(&self, rel: &Path, size: u64) -> io::Result<()> {
        let path = self.cpath(rel)?;
        let size = libc::off_t::try_from(size)
            .map_err(|_| io::Error::from_raw_os_error(libc::EFBIG))?;
        cvt(unsafe { libc::truncate(path.as_ptr(), size) })
    }

    /// Set access and modification times. `None` leaves a time unchanged.
    pub fn utimens(
        &self,
        rel: &Path,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
    ) -> io::Result<()> {
        let path = self.cpath(rel)?;
        let times = [timespec(atime), timespec(mtime)];
        cvt(unsafe { libc::utimensat(libc::AT_FDCWD, path.as_ptr(), times.as_ptr(), 0) })
    }

    pub fn statfs(&self, rel: &Path) -> io::Result<StatFs> {
        let path = self.cpath(rel)?;
        let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
        cvt(unsafe { libc::statvfs(path.as_ptr(), &mut st) })?;
        Ok(StatFs {
            blocks: st.f_blocks as u64,
            bfree: st.f_bfree as u64,
            bavail: st.f_bavail as u64,
            files: st.f_files as u64,
            ffree: st.f_ffree as u64,
            bsize: st.f_bsize as u32,
            namelen: st.f_namemax as u32,
            frsize: st.f_frsize as u32,
        })
    }

    pub fn setxattr(&self, rel: &Path, name: &OsStr, value: &[u8], flags: i32) -> io::Result<()> {
        let path = self.cpath(rel)?;
        let name = cstring(name)?;
        cvt(unsafe {
            libc::setxattr(
                path.as_ptr(),
                name.as_ptr(),
                value.as_ptr() as *const libc::c_void,
                value.len(),
                flags,
            )
        })
    }

    /// Read an attribute into `buf`. With an empty `buf` only the size of
    /// the value is returned.
    pub fn getxattr(&self, rel: &Path, name: &OsStr, buf: &mut [u8]) -> io::Result<usize> {
        let path = self.cpath(rel)?;
        let name = cstring(name)?;
        cvt_size(unsafe {
            libc::getxattr(
                path.as_ptr(),
                name.as_ptr(),
                buf_ptr(buf),
                buf.len(),
            )
        })
    }

    /// List attribute names into `buf`, NUL separated. With an empty `buf`
    /// only the size of the list is returned.
    pub fn listxattr(&self, rel: &Path, buf: &mut [u8]) -> io::Result<usize> {
        let path = self.cpath(rel)?;
        cvt_size(unsafe {
            libc::listxattr(path.as_ptr(), buf_ptr(buf) as *mut libc::c_char, buf.len())
        })
    }

    pub fn removexattr(&self, rel: &Path, name: &OsStr) -> io::Result<()> {
        let path = self.cpath(rel)?;
        let name = cstring(name)?;
        cvt(unsafe { libc::removexattr(path.as_ptr(), name.as_ptr()) })
    }

    /// Open `rel` with the kernel's open flags. `mode` only matters when
    /// `flags` contains `O_CREAT`.
    pub fn open(&self, rel: &Path, flags: i32, mode: u32) -> io::Result<File> {
        let (read, write) = match flags & libc::O_ACCMODE {
            libc::O_WRONLY => (false, true),
            libc::O_RDWR => (true, true),
            _ => (true, false),
        };
        OpenOptions::new()
            .read(read)
            .write(write)
            .custom_flags(flags & !libc::O_ACCMODE)
            .mode(mode)
            .open(self.resolve(rel))
    }

    /// Open a directory for `fsync`.
    pub fn open_dir(&self, rel: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(self.resolve(rel))
    }

    /// Entries of directory `rel`, without `.` and `..`.
    pub fn read_dir(&self, rel: &Path) -> io::Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.resolve(rel))? {
            let entry = entry?;
            entries.push(DirEntryInfo {
                ino: entry.ino(),
                name: entry.file_name(),
                kind: fuser_file_type(entry.file_type()?),
            });
        }
        Ok(entries)
    }
}

fn cstring(s: &OsStr) -> io::Result<CString> {
    CString::new(s.as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

fn cvt(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

fn buf_ptr(buf: &mut [u8]) -> *mut libc::c_void {
    if buf.is_empty() {
        std::ptr::null_mut()
    } else {
        buf.as_mut_ptr() as *mut libc::c_void
    }
}

fn timespec(time: Option<TimeOrNow>) -> libc::timespec {
    let (tv_sec, tv_nsec) = match time {
        None => (0, libc::UTIME_OMIT),
        Some(TimeOrNow::Now) => (0, libc::UTIME_NOW),
        Some(TimeOrNow::SpecificTime(t)) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => (d.as_secs() as libc::time_t, d.subsec_nanos() as libc::c_long),
            Err(e) => {
                let d = e.duration();
                let mut secs = -(d.as_secs() as libc::time_t);
                let mut nsecs = d.subsec_nanos() as libc::c_long;
                if nsecs > 0 {
                    secs -= 1;
                    nsecs = 1_000_000_000 - nsecs;
                }
                (secs, nsecs)
            }
        },
    };
    libc::timespec { tv_sec, tv_nsec }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::os::unix::fs::MetadataExt;
    use std::time::{Duration, SystemTime};

    fn store() -> (tempfile::TempDir, BackingStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = BackingStore::new(dir.path());
        (dir, store)
    }

    fn errno(e: io::Error) -> i32 {
        e.raw_os_error().unwrap()
    }

    #[test]
    fn test_resolve_concatenates_root() {
        let store = BackingStore::new("/srv/backing");
        assert_eq!(store.resolve(Path::new("a/b")), PathBuf::from("/srv/backing/a/b"));
        assert_eq!(store.resolve(Path::new("")), PathBuf::from("/srv/backing"));
    }

    #[test]
    fn test_mkdir_and_rmdir() {
        let (_dir, store) = store();
        store.mkdir(Path::new("d"), 0o755).unwrap();
        assert!(store.stat(Path::new("d")).unwrap().is_dir());
        assert_eq!(errno(store.mkdir(Path::new("d"), 0o755).unwrap_err()), libc::EEXIST);
        store.rmdir(Path::new("d")).unwrap();
        assert_eq!(errno(store.rmdir(Path::new("d")).unwrap_err()), libc::ENOENT);
    }

    #[test]
    fn test_rmdir_non_empty() {
        let (_dir, store) = store();
        store.mkdir(Path::new("d"), 0o755).unwrap();
        store.mkdir(Path::new("d/e"), 0o755).unwrap();
        assert_eq!(errno(store.rmdir(Path::new("d")).unwrap_err()), libc::ENOTEMPTY);
    }

    #[test]
    fn test_open_create_write_read() {
        let (_dir, store) = store();
        let mut f = store
            .open(Path::new("f"), libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL, 0o600)
            .unwrap();
        f.write_all(b"payload").unwrap();
        drop(f);

        let meta = store.stat(Path::new("f")).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o600);

        let mut f = store.open(Path::new("f"), libc::O_RDONLY, 0).unwrap();
        let mut s = String::new();
        f.read_to_string(&mut s).unwrap();
        assert_eq!(s, "payload");

        let err = store
            .open(Path::new("f"), libc::O_WRONLY | libc::O_CREAT | libc::O_EXCL, 0o600)
            .unwrap_err();
        assert_eq!(errno(err), libc::EEXIST);
    }

    #[test]
    fn test_open_missing_is_enoent() {
        let (_dir, store) = store();
        let err = store.open(Path::new("missing"), libc::O_RDONLY, 0).unwrap_err();
        assert_eq!(errno(err), libc::ENOENT);
    }

    #[test]
    fn test_symlink_target_is_verbatim() {
        let (_dir, store) = store();
        store.symlink(Path::new("../elsewhere"), Path::new("l")).unwrap();
        assert_eq!(store.readlink(Path::new("l")).unwrap(), PathBuf::from("../elsewhere"));
        assert!(store.stat(Path::new("l")).unwrap().file_type().is_symlink());
    }

    #[test]
    fn test_rename_and_link() {
        let (_dir, store) = store();
        store.open(Path::new("a"), libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
        store.rename(Path::new("a"), Path::new("b")).unwrap();
        assert!(store.stat(Path::new("a")).is_err());
        store.link(Path::new("b"), Path::new("c")).unwrap();
        assert_eq!(store.stat(Path::new("b")).unwrap().nlink(), 2);
        store.unlink(Path::new("c")).unwrap();
        assert_eq!(store.stat(Path::new("b")).unwrap().nlink(), 1);
    }

    #[test]
    fn test_rename_missing_reports_error() {
        let (_dir, store) = store();
        let err = store.rename(Path::new("nope"), Path::new("b")).unwrap_err();
        assert_eq!(errno(err), libc::ENOENT);
    }

    #[test]
    fn test_chmod_and_truncate() {
        let (_dir, store) = store();
        store.open(Path::new("f"), libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
        store.chmod(Path::new("f"), 0o600).unwrap();
        store.truncate(Path::new("f"), 4096).unwrap();
        let meta = store.stat(Path::new("f")).unwrap();
        assert_eq!(meta.mode() & 0o777, 0o600);
        assert_eq!(meta.len(), 4096);
    }

    #[test]
    fn test_chown_to_self() {
        let (_dir, store) = store();
        store.mkdir(Path::new("d"), 0o755).unwrap();
        let meta = store.stat(Path::new("d")).unwrap();
        store.chown(Path::new("d"), Some(meta.uid()), None).unwrap();
    }

    #[test]
    fn test_utimens_specific_and_omit() {
        let (_dir, store) = store();
        store.open(Path::new("f"), libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
        let when = UNIX_EPOCH + Duration::new(1_000_000, 250);
        store
            .utimens(Path::new("f"), None, Some(TimeOrNow::SpecificTime(when)))
            .unwrap();
        let meta = store.stat(Path::new("f")).unwrap();
        assert_eq!(meta.mtime(), 1_000_000);
        assert_eq!(meta.mtime_nsec(), 250);

        store.utimens(Path::new("f"), Some(TimeOrNow::Now), None).unwrap();
        let meta = store.stat(Path::new("f")).unwrap();
        assert_eq!(meta.mtime(), 1_000_000);
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64;
        assert!(now - meta.atime() < 60);
    }

    #[test]
    fn test_timespec_before_epoch() {
        let t = UNIX_EPOCH - Duration::new(1, 250);
        let ts = timespec(Some(TimeOrNow::SpecificTime(t)));
        assert_eq!(ts.tv_sec, -2);
        assert_eq!(ts.tv_nsec, 999_999_750);
    }

    #[test]
    fn test_statfs() {
        let (_dir, store) = store();
        let st = store.statfs(Path::new("")).unwrap();
        assert!(st.bsize > 0);
        assert!(st.namelen > 0);
    }

    #[test]
    fn test_read_dir_skips_dot_entries() {
        let (_dir, store) = store();
        store.mkdir(Path::new("sub"), 0o755).unwrap();
        store.open(Path::new("file"), libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
        let mut entries = store.read_dir(Path::new("")).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec![OsString::from("file"), OsString::from("sub")]);
        assert_eq!(entries[0].kind, fuser::FileType::RegularFile);
        assert_eq!(entries[1].kind, fuser::FileType::Directory);
    }

    #[test]
    fn test_open_dir() {
        let (_dir, store) = store();
        let dir = store.open_dir(Path::new("")).unwrap();
        dir.sync_all().unwrap();
        store.open(Path::new("f"), libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
        assert_eq!(errno(store.open_dir(Path::new("f")).unwrap_err()), libc::ENOTDIR);
    }

    #[test]
    fn test_xattr_round_trip_or_unsupported() {
        let (_dir, store) = store();
        store.open(Path::new("f"), libc::O_WRONLY | libc::O_CREAT, 0o644).unwrap();
        let name = OsStr::new("user.iohub");
        match store.setxattr(Path::new("f"), name, b"v1", 0) {
            Ok(()) => {}
            // tmpfs without user xattrs, or similar.
            Err(e) if e.raw_os_error() == Some(libc::ENOTSUP) => return,
            Err(e) => panic!("setxattr: {e}"),
        }
        assert_eq!(store.getxattr(Path::new("f"), name, &mut []).unwrap(), 2);
        let mut buf = [0u8; 16];
        let n = store.getxattr(Path::new("f"), name, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"v1");

        let mut list = [0u8; 64];
        let n = store.listxattr(Path::new("f"), &mut list).unwrap();
        assert!(list[..n].split(|b| *b == 0).any(|n| n == b"user.iohub"));

        store.removexattr(Path::new("f"), name).unwrap();
        let err = store.getxattr(Path::new("f"), name, &mut buf).unwrap_err();
        assert_eq!(errno(err), libc::ENODATA);
    }

    #[test]
    fn test_mknod_fifo() {
        let (_dir, store) = store();
        store.mknod(Path::new("p"), libc::S_IFIFO | 0o644, 0).unwrap();
        assert_eq!(
            fuser_file_type(store.stat(Path::new("p")).unwrap().file_type()),
            fuser::FileType::NamedPipe
        );
    }

    #[test]
    fn test_nul_in_name_is_einval() {
        let (_dir, store) = store();
        let err = store.truncate(Path::new("bad\0name"), 0).unwrap_err();
        assert_eq!(errno(err), libc::EINVAL);
    }
}
