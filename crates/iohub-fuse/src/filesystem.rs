//! Passthrough filesystem.
//!
//! Implements `fuser::Filesystem` by forwarding every operation to the
//! backing store. Metadata operations run on the FUSE session thread.
//! Reads, writes and fsyncs are handed to tokio's blocking pool, where they
//! wait on the throttle without holding up other requests.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::consts::FOPEN_DIRECT_IO;
use fuser::{
    FileAttr, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory,
    ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use iohub_throttle::{MonotonicTimeSource, TimeSource};
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::attr::to_file_attr;
use crate::backing::{BackingStore, StatFs};
use crate::dataplane::DataPlane;
use crate::error::{io_errno, FuseError, Result};
use crate::flags::open_flags_to_string;
use crate::handles::{HandleTable, OpenDir, OpenFile};
use crate::inode::{InodeId, InodeTable};

/// How long the kernel may cache entries and attributes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

/// Attribute changes requested by `setattr`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetAttr {
    /// New permission bits.
    pub mode: Option<u32>,
    /// New owner.
    pub uid: Option<u32>,
    /// New group.
    pub gid: Option<u32>,
    /// New length.
    pub size: Option<u64>,
    /// New access time.
    pub atime: Option<TimeOrNow>,
    /// New modification time.
    pub mtime: Option<TimeOrNow>,
    /// Open handle to truncate through, if the caller has one.
    pub fh: Option<u64>,
}

/// Outcome of an xattr query: the kernel either asks for the size of the
/// value or for the value itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XattrReply {
    /// Length of the value.
    Size(u32),
    /// The value itself.
    Data(Vec<u8>),
}

/// Throttled passthrough filesystem.
pub struct IoHubFs<T: TimeSource = MonotonicTimeSource> {
    backing: BackingStore,
    inodes: InodeTable,
    handles: Arc<HandleTable>,
    data: Arc<DataPlane<T>>,
    runtime: Handle,
    ttl: Duration,
}

impl<T: TimeSource> IoHubFs<T> {
    /// Forward to `backing`, moving bytes through `data`. Blocking requests
    /// are spawned on `runtime`.
    pub fn new(backing: BackingStore, data: DataPlane<T>, runtime: Handle) -> Self {
        IoHubFs {
            backing,
            inodes: InodeTable::new(),
            handles: Arc::new(HandleTable::new()),
            data: Arc::new(data),
            runtime,
            ttl: DEFAULT_TTL,
        }
    }

    /// Override the entry and attribute cache lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Where operations are forwarded.
    pub fn backing(&self) -> &BackingStore {
        &self.backing
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn handles(&self) -> &Arc<HandleTable> {
        &self.handles
    }

    pub fn data(&self) -> &Arc<DataPlane<T>> {
        &self.data
    }

    fn path_of(&self, ino: InodeId) -> Result<PathBuf> {
        self.inodes
            .path(ino)
            .map(Path::to_path_buf)
            .ok_or(FuseError::NotFound { ino })
    }

    fn child_of(&self, parent: InodeId, name: &OsStr) -> Result<PathBuf> {
        Ok(self.path_of(parent)?.join(name))
    }

    fn file_of(&self, fh: u64) -> Result<Arc<OpenFile>> {
        self.handles.file(fh).ok_or(FuseError::BadHandle { fh })
    }

    fn dir_of(&self, fh: u64) -> Result<Arc<OpenDir>> {
        self.handles.dir(fh).ok_or(FuseError::BadHandle { fh })
    }

    /// Stat `rel` and bind an inode to it, counting one kernel lookup.
    fn entry(&mut self, rel: &Path) -> Result<FileAttr> {
        let meta = self.backing.stat(rel)?;
        let ino = self.inodes.lookup(rel);
        Ok(to_file_attr(ino, &meta))
    }

    /// Resolve `name` under `parent`.
    pub fn do_lookup(&mut self, parent: InodeId, name: &OsStr) -> Result<FileAttr> {
        let rel = self.child_of(parent, name)?;
        self.entry(&rel)
    }

    /// Attributes of `ino`, through the open handle when there is one.
    pub fn do_getattr(&self, ino: InodeId, fh: Option<u64>) -> Result<FileAttr> {
        if let Some(file) = fh.and_then(|fh| self.handles.file(fh)) {
            return Ok(to_file_attr(ino, &file.file.metadata()?));
        }
        let rel = self.path_of(ino)?;
        Ok(to_file_attr(ino, &self.backing.stat(&rel)?))
    }

    /// Apply `changes` in order: mode, owner, size, times.
    pub fn do_setattr(&mut self, ino: InodeId, changes: SetAttr) -> Result<FileAttr> {
        let rel = self.path_of(ino)?;
        if let Some(mode) = changes.mode {
            self.backing.chmod(&rel, mode)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            self.backing.chown(&rel, changes.uid, changes.gid)?;
        }
        if let Some(size) = changes.size {
            match changes.fh.and_then(|fh| self.handles.file(fh)) {
                Some(file) => self.data.ftruncate(&file.file, size)?,
                None => self.backing.truncate(&rel, size)?,
            }
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            self.backing.utimens(&rel, changes.atime, changes.mtime)?;
        }
        self.do_getattr(ino, changes.fh)
    }

    pub fn do_readlink(&self, ino: InodeId) -> Result<PathBuf> {
        let rel = self.path_of(ino)?;
        Ok(self.backing.readlink(&rel)?)
    }

    /// Create a file node. `umask` is cleared from `mode`.
    pub fn do_mknod(
        &mut self,
        parent: InodeId,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
    ) -> Result<FileAttr> {
        let rel = self.child_of(parent, name)?;
        self.backing.mknod(&rel, mode & !umask, rdev)?;
        self.entry(&rel)
    }

    /// Create a directory. `umask` is cleared from `mode`.
    pub fn do_mkdir(
        &mut self,
        parent: InodeId,
        name: &OsStr,
        mode: u32,
        umask: u32,
    ) -> Result<FileAttr> {
        let rel = self.child_of(parent, name)?;
        self.backing.mkdir(&rel, mode & !umask)?;
        self.entry(&rel)
    }

    pub fn do_unlink(&mut self, parent: InodeId, name: &OsStr) -> Result<()> {
        let rel = self.child_of(parent, name)?;
        self.backing.unlink(&rel)?;
        self.inodes.unlink(&rel);
        Ok(())
    }

    pub fn do_rmdir(&mut self, parent: InodeId, name: &OsStr) -> Result<()> {
        let rel = self.child_of(parent, name)?;
        self.backing.rmdir(&rel)?;
        self.inodes.unlink(&rel);
        Ok(())
    }

    pub fn do_symlink(
        &mut self,
        parent: InodeId,
        name: &OsStr,
        target: &Path,
    ) -> Result<FileAttr> {
        let rel = self.child_of(parent, name)?;
        self.backing.symlink(target, &rel)?;
        self.entry(&rel)
    }

    /// Rename `name` to `newname`. Non-zero `flags` are refused.
    pub fn do_rename(
        &mut self,
        parent: InodeId,
        name: &OsStr,
        newparent: InodeId,
        newname: &OsStr,
        flags: u32,
    ) -> Result<()> {
        if flags != 0 {
            return Err(FuseError::InvalidArgument {
                msg: format!("rename flags {:#x}", flags),
            });
        }
        let from = self.child_of(parent, name)?;
        let to = self.child_of(newparent, newname)?;
        self.backing.rename(&from, &to)?;
        self.inodes.rename(&from, &to);
        Ok(())
    }

    /// Hard link `ino` as `newname` under `newparent`.
    pub fn do_link(
        &mut self,
        ino: InodeId,
        newparent: InodeId,
        newname: &OsStr,
    ) -> Result<FileAttr> {
        let existing = self.path_of(ino)?;
        let rel = self.child_of(newparent, newname)?;
        self.backing.link(&existing, &rel)?;
        self.entry(&rel)
    }

    /// Open `ino` and return the new file handle.
    pub fn do_open(&mut self, ino: InodeId, flags: i32) -> Result<u64> {
        let rel = self.path_of(ino)?;
        let file = self.backing.open(&rel, flags, 0)?;
        Ok(self.handles.insert_file(OpenFile {
            file,
            path: rel,
            flags,
        }))
    }

    /// Create and open `name` under `parent`.
    pub fn do_create(
        &mut self,
        parent: InodeId,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
    ) -> Result<(FileAttr, u64)> {
        let rel = self.child_of(parent, name)?;
        let flags = flags | libc::O_CREAT;
        let file = self.backing.open(&rel, flags, mode & !umask)?;
        let meta = file.metadata()?;
        let ino = self.inodes.lookup(&rel);
        let fh = self.handles.insert_file(OpenFile {
            file,
            path: rel,
            flags,
        });
        Ok((to_file_attr(ino, &meta), fh))
    }

    /// Snapshot the listing of `ino` and return the directory handle.
    pub fn do_opendir(&mut self, ino: InodeId) -> Result<u64> {
        let rel = self.path_of(ino)?;
        let file = self.backing.open_dir(&rel)?;
        let entries = self.backing.read_dir(&rel)?;
        Ok(self.handles.insert_dir(OpenDir { file, entries }))
    }

    pub fn do_statfs(&self, ino: InodeId) -> Result<StatFs> {
        let rel = self.path_of(ino).unwrap_or_default();
        Ok(self.backing.statfs(&rel)?)
    }

    pub fn do_setxattr(
        &self,
        ino: InodeId,
        name: &OsStr,
        value: &[u8],
        flags: i32,
    ) -> Result<()> {
        let rel = self.path_of(ino)?;
        Ok(self.backing.setxattr(&rel, name, value, flags)?)
    }

    /// Read xattr `name`. A zero `size` asks only for the length.
    pub fn do_getxattr(&self, ino: InodeId, name: &OsStr, size: u32) -> Result<XattrReply> {
        let rel = self.path_of(ino)?;
        if size == 0 {
            let len = self.backing.getxattr(&rel, name, &mut [])?;
            return Ok(XattrReply::Size(len as u32));
        }
        let mut buf = vec![0u8; size as usize];
        let len = self.backing.getxattr(&rel, name, &mut buf)?;
        buf.truncate(len);
        Ok(XattrReply::Data(buf))
    }

    /// List xattr names. A zero `size` asks only for the length.
    pub fn do_listxattr(&self, ino: InodeId, size: u32) -> Result<XattrReply> {
        let rel = self.path_of(ino)?;
        if size == 0 {
            let len = self.backing.listxattr(&rel, &mut [])?;
            return Ok(XattrReply::Size(len as u32));
        }
        let mut buf = vec![0u8; size as usize];
        let len = self.backing.listxattr(&rel, &mut buf)?;
        buf.truncate(len);
        Ok(XattrReply::Data(buf))
    }

    pub fn do_removexattr(&self, ino: InodeId, name: &OsStr) -> Result<()> {
        let rel = self.path_of(ino)?;
        Ok(self.backing.removexattr(&rel, name)?)
    }

    fn reply_entry(&self, op: &str, reply: ReplyEntry, result: Result<FileAttr>) {
        match result {
            Ok(attr) => {
                debug!("{} -> ino={}", op, attr.ino);
                reply.entry(&self.ttl, &attr, 0);
            }
            Err(e) => {
                debug!("{} -> {}", op, e);
                reply.error(e.to_errno());
            }
        }
    }
}

fn reply_empty(op: &str, reply: ReplyEmpty, result: Result<()>) {
    match result {
        Ok(()) => {
            debug!("{} -> ok", op);
            reply.ok();
        }
        Err(e) => {
            debug!("{} -> {}", op, e);
            reply.error(e.to_errno());
        }
    }
}

fn reply_xattr(op: &str, reply: ReplyXattr, result: Result<XattrReply>) {
    match result {
        Ok(XattrReply::Size(len)) => reply.size(len),
        Ok(XattrReply::Data(buf)) => reply.data(&buf),
        Err(e) => {
            debug!("{} -> {}", op, e);
            reply.error(e.to_errno());
        }
    }
}

fn offset_of(offset: i64) -> Result<u64> {
    u64::try_from(offset).map_err(|_| FuseError::InvalidArgument {
        msg: format!("negative offset {}", offset),
    })
}

impl<T: TimeSource + 'static> Filesystem for IoHubFs<T> {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut KernelConfig,
    ) -> std::result::Result<(), c_int> {
        info!("iohub forwarding to {}", self.backing.root().display());
        Ok(())
    }

    fn destroy(&mut self) {
        info!(
            "iohub filesystem destroyed, {} files and {} directories still open",
            self.handles.open_files(),
            self.handles.open_dirs()
        );
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        debug!("lookup parent={} name={:?}", parent, name);
        let result = self.do_lookup(parent, name);
        self.reply_entry("lookup", reply, result);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        debug!("forget ino={} nlookup={}", ino, nlookup);
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
        match self.do_getattr(ino, fh) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => {
                debug!("getattr ino={} -> {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr ino={} mode={:?} uid={:?} gid={:?} size={:?}",
            ino, mode, uid, gid, size
        );
        let changes = SetAttr {
            mode,
            uid,
            gid,
            size,
            atime,
            mtime,
            fh,
        };
        match self.do_setattr(ino, changes) {
            Ok(attr) => reply.attr(&self.ttl, &attr),
            Err(e) => {
                debug!("setattr ino={} -> {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
        match self.do_readlink(ino) {
            Ok(target) => reply.data(target.as_os_str().as_bytes()),
            Err(e) => {
                debug!("readlink ino={} -> {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn mknod(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        debug!(
            "mknod parent={} name={:?} mode={:o} rdev={}",
            parent, name, mode, rdev
        );
        let result = self.do_mknod(parent, name, mode, umask, rdev);
        self.reply_entry("mknod", reply, result);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        debug!("mkdir parent={} name={:?} mode={:o}", parent, name, mode);
        let result = self.do_mkdir(parent, name, mode, umask);
        self.reply_entry("mkdir", reply, result);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("unlink parent={} name={:?}", parent, name);
        reply_empty("unlink", reply, self.do_unlink(parent, name));
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("rmdir parent={} name={:?}", parent, name);
        reply_empty("rmdir", reply, self.do_rmdir(parent, name));
    }

    fn symlink(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        debug!(
            "symlink parent={} name={:?} target={}",
            parent,
            link_name,
            target.display()
        );
        let result = self.do_symlink(parent, link_name, target);
        self.reply_entry("symlink", reply, result);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "rename parent={} name={:?} newparent={} newname={:?}",
            parent, name, newparent, newname
        );
        let result = self.do_rename(parent, name, newparent, newname, flags);
        reply_empty("rename", reply, result);
    }

    fn link(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        debug!("link ino={} newparent={} newname={:?}", ino, newparent, newname);
        let result = self.do_link(ino, newparent, newname);
        self.reply_entry("link", reply, result);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open ino={} flags={}", ino, open_flags_to_string(flags));
        match self.do_open(ino, flags) {
            Ok(fh) => reply.opened(fh, FOPEN_DIRECT_IO),
            Err(e) => {
                debug!("open ino={} -> {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        debug!(
            "create parent={} name={:?} mode={:o} flags={}",
            parent,
            name,
            mode,
            open_flags_to_string(flags)
        );
        match self.do_create(parent, name, mode, umask, flags) {
            Ok((attr, fh)) => reply.created(&self.ttl, &attr, 0, fh, FOPEN_DIRECT_IO),
            Err(e) => {
                debug!("create name={:?} -> {}", name, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let uid = req.uid();
        let prepared = self
            .file_of(fh)
            .and_then(|file| offset_of(offset).map(|off| (file, off)));
        let (file, offset) = match prepared {
            Ok(p) => p,
            Err(e) => {
                debug!("read ino={} fh={} -> {}", ino, fh, e);
                reply.error(e.to_errno());
                return;
            }
        };

        let data = Arc::clone(&self.data);
        self.runtime.spawn_blocking(move || {
            match data.read(uid, &file.file, offset, size) {
                Ok(buf) => reply.data(&buf),
                Err(e) => {
                    debug!("read {} -> {}", file.path.display(), e);
                    reply.error(io_errno(&e));
                }
            }
        });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let uid = req.uid();
        let prepared = self
            .file_of(fh)
            .and_then(|file| offset_of(offset).map(|off| (file, off)));
        let (file, offset) = match prepared {
            Ok(p) => p,
            Err(e) => {
                debug!("write ino={} fh={} -> {}", ino, fh, e);
                reply.error(e.to_errno());
                return;
            }
        };

        let payload = data.to_vec();
        let plane = Arc::clone(&self.data);
        self.runtime.spawn_blocking(move || {
            match plane.write(uid, &file.file, offset, &payload) {
                Ok(written) => reply.written(written),
                Err(e) => {
                    debug!("write {} -> {}", file.path.display(), e);
                    reply.error(io_errno(&e));
                }
            }
        });
    }

    fn flush(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _lock_owner: u64,
        reply: ReplyEmpty,
    ) {
        // Nothing is buffered here.
        reply.ok();
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release fh={}", fh);
        self.handles.remove_file(fh);
        reply.ok();
    }

    fn fsync(&mut self, _req: &Request<'_>, ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
        debug!("fsync ino={} fh={} datasync={}", ino, fh, datasync);
        let file = match self.file_of(fh) {
            Ok(f) => f,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        let data = Arc::clone(&self.data);
        self.runtime.spawn_blocking(move || {
            let result = data.fsync(&file.file, datasync).map_err(FuseError::from);
            reply_empty("fsync", reply, result);
        });
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir ino={}", ino);
        match self.do_opendir(ino) {
            Ok(fh) => reply.opened(fh, 0),
            Err(e) => {
                debug!("opendir ino={} -> {}", ino, e);
                reply.error(e.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        debug!("readdir ino={} offset={}", ino, offset);
        let dir = match self.dir_of(fh) {
            Ok(d) => d,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let start = usize::try_from(offset).unwrap_or(0);
        for (i, entry) in dir.entries.iter().enumerate().skip(start) {
            if reply.add(entry.ino, (i + 1) as i64, entry.kind, &entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        debug!("releasedir fh={}", fh);
        self.handles.remove_dir(fh);
        reply.ok();
    }

    fn fsyncdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        datasync: bool,
        reply: ReplyEmpty,
    ) {
        debug!("fsyncdir ino={} datasync={}", ino, datasync);
        let result = self.dir_of(fh).and_then(|dir| {
            let synced = if datasync {
                dir.file.sync_data()
            } else {
                dir.file.sync_all()
            };
            synced.map_err(FuseError::from)
        });
        reply_empty("fsyncdir", reply, result);
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        match self.do_statfs(ino) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(e) => {
                debug!("statfs -> {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn setxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        value: &[u8],
        flags: i32,
        _position: u32,
        reply: ReplyEmpty,
    ) {
        debug!("setxattr ino={} name={:?} len={}", ino, name, value.len());
        reply_empty("setxattr", reply, self.do_setxattr(ino, name, value, flags));
    }

    fn getxattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        name: &OsStr,
        size: u32,
        reply: ReplyXattr,
    ) {
        debug!("getxattr ino={} name={:?} size={}", ino, name, size);
        reply_xattr("getxattr", reply, self.do_getxattr(ino, name, size));
    }

    fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
        debug!("listxattr ino={} size={}", ino, size);
        reply_xattr("listxattr", reply, self.do_listxattr(ino, size));
    }

    fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
        debug!("removexattr ino={} name={:?}", ino, name);
        reply_empty("removexattr", reply, self.do_removexattr(ino, name));
    }

    fn fallocate(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        length: i64,
        mode: i32,
        reply: ReplyEmpty,
    ) {
        debug!(
            "fallocate ino={} offset={} length={} mode={}",
            ino, offset, length, mode
        );
        let result = self.file_of(fh).and_then(|file| {
            self.data
                .fallocate(&file.file, mode, offset, length)
                .map_err(FuseError::from)
        });
        reply_empty("fallocate", reply, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inode::ROOT_INODE;
    use iohub_throttle::{Allocation, ManualTimeSource, PeriodClock, QuotaRegistry, ThrottleGate};
    use std::ffi::OsString;

    struct Fixture {
        _dir: tempfile::TempDir,
        _rt: tokio::runtime::Runtime,
        fs: IoHubFs<ManualTimeSource>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let registry = Arc::new(QuotaRegistry::new([Allocation::fallback(1 << 20)]).unwrap());
        let clock = PeriodClock::new(ManualTimeSource::new(), Duration::from_secs(5)).unwrap();
        let gate = Arc::new(ThrottleGate::with_clock(registry, clock));
        let fs = IoHubFs::new(
            BackingStore::new(dir.path()),
            DataPlane::new(gate),
            rt.handle().clone(),
        );
        Fixture {
            _dir: dir,
            _rt: rt,
            fs,
        }
    }

    fn name(s: &str) -> OsString {
        OsString::from(s)
    }

    #[test]
    fn test_root_getattr() {
        let f = fixture();
        let attr = f.fs.do_getattr(ROOT_INODE, None).unwrap();
        assert_eq!(attr.ino, ROOT_INODE);
        assert_eq!(attr.kind, fuser::FileType::Directory);
    }

    #[test]
    fn test_getattr_unknown_inode() {
        let f = fixture();
        let err = f.fs.do_getattr(999, None).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_mkdir_then_lookup() {
        let mut f = fixture();
        let made = f.fs.do_mkdir(ROOT_INODE, &name("d"), 0o755, 0o022).unwrap();
        assert_eq!(made.kind, fuser::FileType::Directory);
        assert_eq!(made.perm, 0o755);
        let found = f.fs.do_lookup(ROOT_INODE, &name("d")).unwrap();
        assert_eq!(found.ino, made.ino);
    }

    #[test]
    fn test_mkdir_existing_is_eexist() {
        let mut f = fixture();
        f.fs.do_mkdir(ROOT_INODE, &name("d"), 0o755, 0).unwrap();
        let err = f.fs.do_mkdir(ROOT_INODE, &name("d"), 0o755, 0).unwrap_err();
        assert_eq!(err.to_errno(), libc::EEXIST);
    }

    #[test]
    fn test_rmdir_missing_is_enoent() {
        let mut f = fixture();
        let err = f.fs.do_rmdir(ROOT_INODE, &name("nope")).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_umask_is_applied() {
        let mut f = fixture();
        let (attr, _) = f
            .fs
            .do_create(ROOT_INODE, &name("f"), 0o666, 0o027, libc::O_WRONLY)
            .unwrap();
        assert_eq!(attr.perm, 0o640);
    }

    #[test]
    fn test_create_write_read_through_handles() {
        let mut f = fixture();
        let (attr, fh) = f
            .fs
            .do_create(ROOT_INODE, &name("f"), 0o644, 0, libc::O_RDWR)
            .unwrap();
        assert_eq!(attr.kind, fuser::FileType::RegularFile);

        let file = f.fs.handles().file(fh).unwrap();
        f.fs.data().write(1000, &file.file, 0, b"abcdef").unwrap();
        assert_eq!(f.fs.data().read(1000, &file.file, 2, 3).unwrap(), b"cde");

        let by_handle = f.fs.do_getattr(attr.ino, Some(fh)).unwrap();
        assert_eq!(by_handle.size, 6);
    }

    #[test]
    fn test_open_missing_handle_is_ebadf() {
        let f = fixture();
        assert_eq!(f.fs.file_of(77).unwrap_err().to_errno(), libc::EBADF);
    }

    #[test]
    fn test_setattr_truncate_and_chmod() {
        let mut f = fixture();
        let (attr, fh) = f
            .fs
            .do_create(ROOT_INODE, &name("f"), 0o644, 0, libc::O_WRONLY)
            .unwrap();
        let changed = f
            .fs
            .do_setattr(
                attr.ino,
                SetAttr {
                    mode: Some(0o600),
                    size: Some(100),
                    ..SetAttr::default()
                },
            )
            .unwrap();
        assert_eq!(changed.perm, 0o600);
        assert_eq!(changed.size, 100);

        let changed = f
            .fs
            .do_setattr(
                attr.ino,
                SetAttr {
                    size: Some(10),
                    fh: Some(fh),
                    ..SetAttr::default()
                },
            )
            .unwrap();
        assert_eq!(changed.size, 10);
    }

    #[test]
    fn test_symlink_and_readlink() {
        let mut f = fixture();
        let attr = f
            .fs
            .do_symlink(ROOT_INODE, &name("l"), Path::new("target/file"))
            .unwrap();
        assert_eq!(attr.kind, fuser::FileType::Symlink);
        assert_eq!(f.fs.do_readlink(attr.ino).unwrap(), PathBuf::from("target/file"));
    }

    #[test]
    fn test_rename_updates_inode_paths() {
        let mut f = fixture();
        let dir = f.fs.do_mkdir(ROOT_INODE, &name("a"), 0o755, 0).unwrap();
        let (child, _) = f
            .fs
            .do_create(dir.ino, &name("x"), 0o644, 0, libc::O_WRONLY)
            .unwrap();
        f.fs
            .do_rename(ROOT_INODE, &name("a"), ROOT_INODE, &name("b"), 0)
            .unwrap();
        assert_eq!(f.fs.inodes().path(child.ino), Some(Path::new("b/x")));
        assert!(f.fs.do_getattr(child.ino, None).is_ok());
        assert!(f.fs.backing().stat(Path::new("b/x")).is_ok());
    }

    #[test]
    fn test_rename_flags_rejected() {
        let mut f = fixture();
        let err = f
            .fs
            .do_rename(ROOT_INODE, &name("a"), ROOT_INODE, &name("b"), 1)
            .unwrap_err();
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn test_link_and_unlink() {
        let mut f = fixture();
        let (attr, _) = f
            .fs
            .do_create(ROOT_INODE, &name("f"), 0o644, 0, libc::O_WRONLY)
            .unwrap();
        let linked = f.fs.do_link(attr.ino, ROOT_INODE, &name("g")).unwrap();
        assert_eq!(linked.nlink, 2);
        f.fs.do_unlink(ROOT_INODE, &name("f")).unwrap();
        assert!(f.fs.inodes().ino_of(Path::new("f")).is_none());
        let err = f.fs.do_lookup(ROOT_INODE, &name("f")).unwrap_err();
        assert_eq!(err.to_errno(), libc::ENOENT);
    }

    #[test]
    fn test_opendir_snapshot() {
        let mut f = fixture();
        f.fs.do_mkdir(ROOT_INODE, &name("one"), 0o755, 0).unwrap();
        let fh = f.fs.do_opendir(ROOT_INODE).unwrap();
        f.fs.do_mkdir(ROOT_INODE, &name("two"), 0o755, 0).unwrap();
        let dir = f.fs.handles().dir(fh).unwrap();
        let names: Vec<_> = dir.entries.iter().map(|e| e.name.clone()).collect();
        assert_eq!(names, vec![name("one")]);
    }

    #[test]
    fn test_statfs_root() {
        let f = fixture();
        assert!(f.fs.do_statfs(ROOT_INODE).unwrap().bsize > 0);
    }

    #[test]
    fn test_xattr_size_probe() {
        let mut f = fixture();
        let (attr, _) = f
            .fs
            .do_create(ROOT_INODE, &name("f"), 0o644, 0, libc::O_WRONLY)
            .unwrap();
        let xname = name("user.tag");
        if f.fs.do_setxattr(attr.ino, &xname, b"abc", 0).is_err() {
            return;
        }
        assert_eq!(
            f.fs.do_getxattr(attr.ino, &xname, 0).unwrap(),
            XattrReply::Size(3)
        );
        assert_eq!(
            f.fs.do_getxattr(attr.ino, &xname, 16).unwrap(),
            XattrReply::Data(b"abc".to_vec())
        );
        let err = f.fs.do_getxattr(attr.ino, &xname, 1).unwrap_err();
        assert_eq!(err.to_errno(), libc::ERANGE);
        f.fs.do_removexattr(attr.ino, &xname).unwrap();
    }
}
