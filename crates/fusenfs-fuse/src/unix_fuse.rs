//! Unix FUSE implementation using the `fuser` crate.

use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use tracing::{debug, error, info, warn};

use fusenfs_config::FuseConfig;
use fusenfs_core::Identity;

use crate::adapter::NfsFsCore;
use crate::dispatch::Dispatcher;
use crate::error::{FuseError, FuseResult};
use crate::inode::{child_path, parent_path, InodeTable, ROOT_INO};
use crate::stat::{to_timespec, FileKind, FileStat};

/// Longest symlink target handed back to the kernel.
const PATH_MAX: usize = libc::PATH_MAX as usize;

/// State every request handler reads, shared with the worker pool.
struct Shared {
    core: NfsFsCore,
    inodes: InodeTable,
    entry_ttl: Duration,
    attr_ttl: Duration,
    direct_io: bool,
}

/// Unix FUSE filesystem wrapper around `NfsFsCore`.
///
/// With `multithread` set, each kernel request is answered on a worker
/// thread, so several requests wait on the remote session at once.
pub struct UnixFuse {
    shared: Arc<Shared>,
    dispatcher: Dispatcher,
    max_write: u32,
}

impl UnixFuse {
    pub fn new(core: NfsFsCore, config: &FuseConfig) -> Self {
        let dispatcher = if config.multithread {
            Dispatcher::pool(config.worker_threads)
        } else {
            Dispatcher::inline()
        };
        UnixFuse {
            shared: Arc::new(Shared {
                core,
                inodes: InodeTable::new(),
                entry_ttl: config.entry_timeout.as_duration(),
                attr_ttl: config.attr_timeout.as_duration(),
                direct_io: config.direct_io,
            }),
            dispatcher,
            max_write: config.max_write,
        }
    }

    pub fn core(&self) -> &NfsFsCore {
        &self.shared.core
    }

    /// Worker threads serving requests; zero when single-threaded.
    pub fn workers(&self) -> usize {
        self.dispatcher.workers()
    }

    fn serve<F>(&self, job: F)
    where
        F: FnOnce(&Shared) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        self.dispatcher.run(move || job(&shared));
    }
}

fn caller(req: &Request) -> Identity {
    Identity::new(req.uid(), req.gid())
}

impl Shared {
    fn path_of(&self, ino: u64) -> FuseResult<String> {
        self.inodes.get_path(ino).ok_or(FuseError::UnknownInode(ino))
    }

    fn child(&self, parent: u64, name: &OsStr) -> FuseResult<String> {
        let name = name_str(name)?;
        self.inodes
            .resolve_child(parent, name)
            .ok_or(FuseError::UnknownInode(parent))
    }

    fn attr_for(&self, path: &str, st: &FileStat) -> FileAttr {
        to_file_attr(self.inodes.get_or_insert(path), st)
    }

    /// Stat `path` and reply with a fresh entry for it.
    fn reply_entry(&self, caller: Identity, path: &str, reply: ReplyEntry) {
        match self.core.getattr(caller, path) {
            Ok(st) => reply.entry(&self.entry_ttl, &self.attr_for(path, &st), 0),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn open_flags(&self) -> u32 {
        if self.direct_io {
            fuser::consts::FOPEN_DIRECT_IO
        } else {
            0
        }
    }

    fn lookup(&self, caller: Identity, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        debug!("lookup: parent={}, path={}", parent, path);
        self.reply_entry(caller, &path, reply);
    }

    fn getattr(&self, caller: Identity, ino: u64, reply: ReplyAttr) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.core.getattr(caller, &path));
        match result {
            Ok(st) => reply.attr(&self.attr_ttl, &to_file_attr(ino, &st)),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn setattr(&self, caller: Identity, ino: u64, changes: AttrChanges, reply: ReplyAttr) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.apply(caller, &path, changes));
        match result {
            Ok(st) => reply.attr(&self.attr_ttl, &to_file_attr(ino, &st)),
            Err(e) => {
                error!("setattr failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn apply(&self, caller: Identity, path: &str, changes: AttrChanges) -> FuseResult<FileStat> {
        if let Some(mode) = changes.mode {
            self.core.chmod(caller, path, mode & 0o7777)?;
        }
        if changes.uid.is_some() || changes.gid.is_some() {
            self.core.chown(caller, path, changes.uid, changes.gid)?;
        }
        if let Some(size) = changes.size {
            self.core.truncate(caller, path, size)?;
        }
        if changes.atime.is_some() || changes.mtime.is_some() {
            // utime sets both; keep the current value of the one not given.
            let current = self.core.getattr(caller, path)?;
            let resolve = |t: Option<TimeOrNow>, current: SystemTime| match t {
                Some(TimeOrNow::SpecificTime(t)) => t,
                Some(TimeOrNow::Now) => SystemTime::now(),
                None => current,
            };
            let atime = resolve(changes.atime, current.atime);
            let mtime = resolve(changes.mtime, current.mtime);
            self.core
                .utime(caller, path, to_timespec(atime), to_timespec(mtime))?;
        }
        self.core.getattr(caller, path)
    }

    fn readlink(&self, caller: Identity, ino: u64, reply: ReplyData) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.core.readlink(caller, &path, PATH_MAX));
        match result {
            Ok(target) => reply.data(&target),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn mknod(
        &self,
        caller: Identity,
        parent: u64,
        name: &OsStr,
        mode: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        debug!("mknod: path={}, mode={:o}, rdev={}", path, mode, rdev);

        match self.core.mknod(caller, &path, mode, rdev as u64) {
            Ok(()) => self.reply_entry(caller, &path, reply),
            Err(e) => {
                error!("mknod failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn mkdir(&self, caller: Identity, parent: u64, name: &OsStr, mode: u32, reply: ReplyEntry) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        debug!("mkdir: path={}, mode={:o}", path, mode);

        match self.core.mkdir(caller, &path, mode) {
            Ok(()) => self.reply_entry(caller, &path, reply),
            Err(e) => {
                error!("mkdir failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&self, caller: Identity, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child(parent, name).and_then(|path| {
            debug!("unlink: path={}", path);
            self.core.unlink(caller, &path)?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("unlink failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn rmdir(&self, caller: Identity, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let result = self.child(parent, name).and_then(|path| {
            debug!("rmdir: path={}", path);
            self.core.rmdir(caller, &path)?;
            self.inodes.remove_path(&path);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("rmdir failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn symlink(
        &self,
        caller: Identity,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let (path, target) = match (self.child(parent, link_name), target.to_str()) {
            (Ok(p), Some(t)) => (p, t),
            (Err(e), _) => {
                reply.error(e.to_errno());
                return;
            }
            (_, None) => {
                reply.error(libc::EINVAL);
                return;
            }
        };

        debug!("symlink: path={}, target={}", path, target);

        match self.core.symlink(caller, target, &path) {
            Ok(()) => self.reply_entry(caller, &path, reply),
            Err(e) => {
                error!("symlink failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn rename(
        &self,
        caller: Identity,
        (parent, name): (u64, &OsStr),
        (newparent, newname): (u64, &OsStr),
        reply: ReplyEmpty,
    ) {
        let result = self.child(parent, name).and_then(|from| {
            let to = self.child(newparent, newname)?;
            debug!("rename: from={}, to={}", from, to);
            self.core.rename(caller, &from, &to)?;
            self.inodes.rename(&from, &to);
            Ok(())
        });
        match result {
            Ok(()) => reply.ok(),
            Err(e) => {
                error!("rename failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn link(
        &self,
        caller: Identity,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let paths = self
            .path_of(ino)
            .and_then(|from| Ok((from, self.child(newparent, newname)?)));
        let (from, to) = match paths {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        debug!("link: from={}, to={}", from, to);

        match self.core.link(caller, &from, &to) {
            Ok(()) => self.reply_entry(caller, &to, reply),
            Err(e) => {
                error!("link failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn open(&self, caller: Identity, ino: u64, flags: i32, reply: ReplyOpen) {
        let result = self
            .path_of(ino)
            .and_then(|path| self.core.open(caller, &path, flags));
        match result {
            Ok(fh) => reply.opened(fh, self.open_flags()),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn read(&self, caller: Identity, fh: u64, offset: u64, size: u32, reply: ReplyData) {
        match self.core.read(caller, fh, offset, size) {
            Ok(data) => reply.data(&data),
            Err(e) => {
                error!("read failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn write(&self, caller: Identity, fh: u64, offset: u64, data: &[u8], reply: ReplyWrite) {
        match self.core.write(caller, fh, offset, data) {
            Ok(written) => reply.written(written),
            Err(e) => {
                error!("write failed: {}", e);
                reply.error(e.to_errno());
            }
        }
    }

    fn release(&self, caller: Identity, fh: u64, reply: ReplyEmpty) {
        match self.core.release(caller, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&self, caller: Identity, fh: u64, reply: ReplyEmpty) {
        match self.core.fsync(caller, fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn readdir(&self, caller: Identity, ino: u64, offset: i64, mut reply: ReplyDirectory) {
        let path = match self.path_of(ino) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let parent_ino = if ino == ROOT_INO {
            ROOT_INO
        } else {
            self.inodes.get_or_insert(parent_path(&path))
        };
        let mut entries = vec![
            (ino, FileType::Directory, ".".to_string()),
            (parent_ino, FileType::Directory, "..".to_string()),
        ];
        let listed = self.core.readdir(caller, &path, |entry| {
            if entry.name == "." || entry.name == ".." {
                return false;
            }
            let child_ino = self.inodes.get_or_insert(&child_path(&path, &entry.name));
            let kind = entry.kind.map(file_type).unwrap_or(FileType::RegularFile);
            entries.push((child_ino, kind, entry.name));
            false
        });
        if let Err(e) = listed {
            error!("readdir failed: {}", e);
            reply.error(e.to_errno());
            return;
        }

        for (i, (entry_ino, kind, name)) in entries.iter().enumerate().skip(offset as usize) {
            if reply.add(*entry_ino, (i + 1) as i64, *kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&self, caller: Identity, ino: u64, reply: ReplyStatfs) {
        let path = self.inodes.get_path(ino).unwrap_or_else(|| "/".to_string());
        match self.core.statfs(caller, &path) {
            Ok(st) => reply.statfs(
                st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen,
                st.frsize,
            ),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn create(
        &self,
        caller: Identity,
        parent: u64,
        name: &OsStr,
        mode: u32,
        reply: ReplyCreate,
    ) {
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        debug!("create: path={}, mode={:o}", path, mode);

        let fh = match self.core.create(caller, &path, mode) {
            Ok(fh) => fh,
            Err(e) => {
                error!("create failed: {}", e);
                reply.error(e.to_errno());
                return;
            }
        };
        match self.core.getattr(caller, &path) {
            Ok(st) => {
                let attr = self.attr_for(&path, &st);
                reply.created(&self.entry_ttl, &attr, 0, fh, self.open_flags());
            }
            Err(e) => {
                let _ = self.core.release(caller, fh);
                reply.error(e.to_errno());
            }
        }
    }
}

/// Attribute changes requested by one `setattr`.
#[derive(Debug)]
struct AttrChanges {
    mode: Option<u32>,
    uid: Option<u32>,
    gid: Option<u32>,
    size: Option<u64>,
    atime: Option<TimeOrNow>,
    mtime: Option<TimeOrNow>,
}

fn name_str(name: &OsStr) -> FuseResult<&str> {
    match name.to_str() {
        Some(n) if !n.is_empty() && !n.contains('/') => Ok(n),
        _ => Err(FuseError::InvalidName),
    }
}

fn file_type(kind: FileKind) -> FileType {
    match kind {
        FileKind::RegularFile => FileType::RegularFile,
        FileKind::Directory => FileType::Directory,
        FileKind::Symlink => FileType::Symlink,
        FileKind::CharDevice => FileType::CharDevice,
        FileKind::BlockDevice => FileType::BlockDevice,
        FileKind::NamedPipe => FileType::NamedPipe,
        FileKind::Socket => FileType::Socket,
    }
}

/// Device number in the 32-bit form the kernel protocol carries.
///
/// Numbers that do not fit saturate instead of aliasing another device.
fn fuse_rdev(rdev: u64) -> u32 {
    u32::try_from(rdev).unwrap_or(u32::MAX)
}

/// Convert adapter attributes to `fuser::FileAttr` under local inode `ino`.
pub fn to_file_attr(ino: u64, st: &FileStat) -> FileAttr {
    FileAttr {
        ino,
        size: st.size,
        blocks: st.blocks,
        atime: st.atime,
        mtime: st.mtime,
        ctime: st.ctime,
        crtime: st.ctime,
        kind: file_type(st.kind),
        perm: st.perm,
        nlink: st.nlink,
        uid: st.uid,
        gid: st.gid,
        rdev: fuse_rdev(st.rdev),
        blksize: if st.blksize == 0 { 4096 } else { st.blksize },
        flags: 0,
    }
}

impl Filesystem for UnixFuse {
    fn init(&mut self, _req: &Request, config: &mut KernelConfig) -> Result<(), libc::c_int> {
        if let Err(nearest) = config.set_max_write(self.max_write) {
            warn!(
                "max_write {} not accepted by the kernel, using {}",
                self.max_write, nearest
            );
            let _ = config.set_max_write(nearest);
        }
        info!(workers = self.workers(), "FUSE session initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        let open = self.shared.core.open_handles();
        if open > 0 {
            warn!("unmounting with {} open file handles", open);
        }
        info!("FUSE session destroyed");
    }

    fn lookup(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let caller = caller(req);
        let name = name.to_os_string();
        self.serve(move |fs| fs.lookup(caller, parent, &name, reply));
    }

    fn getattr(&mut self, req: &Request, ino: u64, reply: ReplyAttr) {
        debug!("getattr: ino={}", ino);

        let caller = caller(req);
        self.serve(move |fs| fs.getattr(caller, ino, reply));
    }

    fn setattr(
        &mut self,
        req: &Request,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        debug!(
            "setattr: ino={}, mode={:?}, uid={:?}, gid={:?}, size={:?}",
            ino, mode, uid, gid, size
        );

        let caller = caller(req);
        let changes = AttrChanges {
            mode,
            uid,
            gid,
            size,
            atime,
            mtime,
        };
        self.serve(move |fs| fs.setattr(caller, ino, changes, reply));
    }

    fn readlink(&mut self, req: &Request, ino: u64, reply: ReplyData) {
        debug!("readlink: ino={}", ino);

        let caller = caller(req);
        self.serve(move |fs| fs.readlink(caller, ino, reply));
    }

    fn mknod(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let caller = caller(req);
        let name = name.to_os_string();
        let mode = (mode & libc::S_IFMT) | (mode & 0o7777 & !umask);
        self.serve(move |fs| fs.mknod(caller, parent, &name, mode, rdev, reply));
    }

    fn mkdir(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        reply: ReplyEntry,
    ) {
        let caller = caller(req);
        let name = name.to_os_string();
        let mode = mode & 0o7777 & !umask;
        self.serve(move |fs| fs.mkdir(caller, parent, &name, mode, reply));
    }

    fn unlink(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let caller = caller(req);
        let name = name.to_os_string();
        self.serve(move |fs| fs.unlink(caller, parent, &name, reply));
    }

    fn rmdir(&mut self, req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let caller = caller(req);
        let name = name.to_os_string();
        self.serve(move |fs| fs.rmdir(caller, parent, &name, reply));
    }

    fn symlink(
        &mut self,
        req: &Request,
        parent: u64,
        link_name: &OsStr,
        target: &Path,
        reply: ReplyEntry,
    ) {
        let caller = caller(req);
        let link_name = link_name.to_os_string();
        let target = target.to_path_buf();
        self.serve(move |fs| fs.symlink(caller, parent, &link_name, &target, reply));
    }

    fn rename(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE and RENAME_EXCHANGE have no remote counterpart.
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let caller = caller(req);
        let name = name.to_os_string();
        let newname = newname.to_os_string();
        self.serve(move |fs| fs.rename(caller, (parent, &name), (newparent, &newname), reply));
    }

    fn link(
        &mut self,
        req: &Request,
        ino: u64,
        newparent: u64,
        newname: &OsStr,
        reply: ReplyEntry,
    ) {
        let caller = caller(req);
        let newname = newname.to_os_string();
        self.serve(move |fs| fs.link(caller, ino, newparent, &newname, reply));
    }

    fn open(&mut self, req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        debug!("open: ino={}, flags={:#x}", ino, flags);

        let caller = caller(req);
        self.serve(move |fs| fs.open(caller, ino, flags, reply));
    }

    fn read(
        &mut self,
        req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        debug!("read: ino={}, fh={}, offset={}, size={}", ino, fh, offset, size);

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let caller = caller(req);
        self.serve(move |fs| fs.read(caller, fh, offset as u64, size, reply));
    }

    fn write(
        &mut self,
        req: &Request,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!("write: ino={}, fh={}, offset={}, size={}", ino, fh, offset, data.len());

        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let caller = caller(req);
        let data = data.to_vec();
        self.serve(move |fs| fs.write(caller, fh, offset as u64, &data, reply));
    }

    fn release(
        &mut self,
        req: &Request,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        debug!("release: ino={}, fh={}", ino, fh);

        let caller = caller(req);
        self.serve(move |fs| fs.release(caller, fh, reply));
    }

    fn fsync(&mut self, req: &Request, ino: u64, fh: u64, _datasync: bool, reply: ReplyEmpty) {
        debug!("fsync: ino={}, fh={}", ino, fh);

        let caller = caller(req);
        self.serve(move |fs| fs.fsync(caller, fh, reply));
    }

    fn opendir(&mut self, _req: &Request, ino: u64, _flags: i32, reply: ReplyOpen) {
        debug!("opendir: ino={}", ino);

        if self.shared.inodes.get_path(ino).is_some() {
            reply.opened(0, 0);
        } else {
            reply.error(libc::ENOENT);
        }
    }

    fn readdir(
        &mut self,
        req: &Request,
        ino: u64,
        _fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        debug!("readdir: ino={}, offset={}", ino, offset);

        let caller = caller(req);
        self.serve(move |fs| fs.readdir(caller, ino, offset, reply));
    }

    fn statfs(&mut self, req: &Request, ino: u64, reply: ReplyStatfs) {
        let caller = caller(req);
        self.serve(move |fs| fs.statfs(caller, ino, reply));
    }

    fn create(
        &mut self,
        req: &Request,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let caller = caller(req);
        let name = name.to_os_string();
        let mode = mode & 0o7777 & !umask;
        self.serve(move |fs| fs.create(caller, parent, &name, mode, reply));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(kind: FileKind) -> FileStat {
        FileStat {
            ino: 900,
            kind,
            perm: 0o640,
            nlink: 1,
            uid: 10,
            gid: 20,
            rdev: 0,
            size: 1024,
            blksize: 0,
            blocks: 2,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_file_attr_uses_local_inode() {
        let attr = to_file_attr(42, &stat(FileKind::RegularFile));
        assert_eq!(attr.ino, 42);
        assert_eq!(attr.size, 1024);
        assert_eq!(attr.perm, 0o640);
        assert_eq!((attr.uid, attr.gid), (10, 20));
        assert_eq!(attr.kind, FileType::RegularFile);
        assert_eq!(attr.blksize, 4096);
    }

    #[test]
    fn test_wide_device_numbers_saturate() {
        let mut st = stat(FileKind::CharDevice);
        st.rdev = (1 << 8) | 3;
        assert_eq!(to_file_attr(1, &st).rdev, 0x103);

        st.rdev = 1 << 40;
        assert_eq!(to_file_attr(1, &st).rdev, u32::MAX);
        assert_eq!(fuse_rdev(u64::MAX), u32::MAX);
        assert_eq!(fuse_rdev(u32::MAX as u64), u32::MAX);
    }

    #[test]
    fn test_file_kind_mapping() {
        assert_eq!(file_type(FileKind::Directory), FileType::Directory);
        assert_eq!(file_type(FileKind::Symlink), FileType::Symlink);
        assert_eq!(file_type(FileKind::NamedPipe), FileType::NamedPipe);
        assert_eq!(file_type(FileKind::BlockDevice), FileType::BlockDevice);
    }

    #[test]
    fn test_name_validation() {
        assert_eq!(name_str(OsStr::new("ok.txt")).unwrap(), "ok.txt");
        assert!(name_str(OsStr::new("a/b")).is_err());
        assert!(name_str(OsStr::new("")).is_err());
    }
}
