//! In-memory export served by the loopback server.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;

use fusenfs_core::{
    Identity, RemoteDirEntry, RemoteFh, RemoteReply, RemoteRequest, RemoteStat, RemoteStatVfs,
    Timespec,
};

const ROOT_INO: u64 = 1;
const BLOCK_SIZE: u32 = 4096;
const TOTAL_BLOCKS: u64 = 1 << 20;
const MAX_FILES: u64 = 1 << 20;
const NAME_MAX: usize = 255;
/// Largest file the export will hold; the capacity statvfs reports.
const MAX_FILE_SIZE: u64 = TOTAL_BLOCKS * BLOCK_SIZE as u64;

type OpResult = Result<RemoteReply, i32>;

#[derive(Debug, Clone)]
enum NodeKind {
    Directory(BTreeMap<String, u64>),
    File(Vec<u8>),
    Symlink(String),
    /// Device nodes, FIFOs and sockets.
    Special { rdev: u64 },
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mode: u32,
    uid: u32,
    gid: u32,
    nlink: u32,
    atime: Timespec,
    mtime: Timespec,
    ctime: Timespec,
}

impl Node {
    fn new(kind: NodeKind, mode: u32, owner: Identity) -> Self {
        let now = now();
        let nlink = if matches!(kind, NodeKind::Directory(_)) { 2 } else { 1 };
        Node {
            kind,
            mode,
            uid: owner.uid,
            gid: owner.gid,
            nlink,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    fn size(&self) -> u64 {
        match &self.kind {
            NodeKind::Directory(_) => BLOCK_SIZE as u64,
            NodeKind::File(data) => data.len() as u64,
            NodeKind::Symlink(target) => target.len() as u64,
            NodeKind::Special { .. } => 0,
        }
    }

    fn touch(&mut self) {
        let now = now();
        self.mtime = now;
        self.ctime = now;
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenFile {
    ino: u64,
    writable: bool,
}

fn now() -> Timespec {
    let now = Utc::now();
    Timespec::new(now.timestamp(), now.timestamp_subsec_nanos())
}

fn split(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|c| !c.is_empty() && *c != ".")
}

/// A POSIX-like tree held in memory.
///
/// Ownership of new objects comes from the caller's credentials. Permission
/// bits are stored but not enforced; the kernel checks them on the mount.
#[derive(Debug)]
pub struct MemExport {
    nodes: HashMap<u64, Node>,
    next_ino: u64,
    open: HashMap<u64, OpenFile>,
    next_fh: u64,
}

impl Default for MemExport {
    fn default() -> Self {
        Self::new(Identity::new(0, 0))
    }
}

impl MemExport {
    /// Empty export whose root directory belongs to `owner`.
    pub fn new(owner: Identity) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_INO,
            Node::new(
                NodeKind::Directory(BTreeMap::new()),
                libc::S_IFDIR | 0o755,
                owner,
            ),
        );
        MemExport {
            nodes,
            next_ino: ROOT_INO + 1,
            open: HashMap::new(),
            next_fh: 1,
        }
    }

    /// Execute one request on behalf of `credentials`.
    pub fn handle(&mut self, credentials: Identity, request: RemoteRequest) -> OpResult {
        match request {
            RemoteRequest::Lstat { path } => {
                let ino = self.resolve(&path)?;
                Ok(RemoteReply::Stat(self.stat_of(ino)))
            }
            RemoteRequest::Opendir { path } => self.opendir(&path),
            RemoteRequest::Readlink { path } => {
                let ino = self.resolve(&path)?;
                match &self.node(ino)?.kind {
                    NodeKind::Symlink(target) => Ok(RemoteReply::Link(target.as_bytes().to_vec())),
                    _ => Err(libc::EINVAL),
                }
            }
            RemoteRequest::Open { path, flags } => self.open(&path, flags, credentials),
            RemoteRequest::Close { fh } => self.close(fh),
            RemoteRequest::Pread { fh, offset, count } => self.pread(fh, offset, count),
            RemoteRequest::Pwrite { fh, offset, data } => self.pwrite(fh, offset, &data),
            RemoteRequest::Creat { path, mode } => self.creat(&path, mode, credentials),
            RemoteRequest::Utime { path, atime, mtime } => {
                let ino = self.resolve(&path)?;
                let node = self.node_mut(ino)?;
                node.atime = atime;
                node.mtime = mtime;
                node.ctime = now();
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Unlink { path } => self.unlink(&path),
            RemoteRequest::Rmdir { path } => self.rmdir(&path),
            RemoteRequest::Mkdir { path } => {
                let node = Node::new(
                    NodeKind::Directory(BTreeMap::new()),
                    libc::S_IFDIR | 0o755,
                    credentials,
                );
                self.insert_new(&path, node)?;
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Mknod { path, mode, rdev } => {
                let kind = match mode & libc::S_IFMT {
                    libc::S_IFREG => NodeKind::File(Vec::new()),
                    libc::S_IFCHR | libc::S_IFBLK | libc::S_IFIFO | libc::S_IFSOCK => {
                        NodeKind::Special { rdev }
                    }
                    _ => return Err(libc::EINVAL),
                };
                self.insert_new(&path, Node::new(kind, mode, credentials))?;
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Symlink { target, link } => {
                let node = Node::new(NodeKind::Symlink(target), libc::S_IFLNK | 0o777, credentials);
                self.insert_new(&link, node)?;
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Rename { from, to } => self.rename(&from, &to),
            RemoteRequest::Link { from, to } => self.link(&from, &to),
            RemoteRequest::Chmod { path, mode } => {
                let ino = self.resolve(&path)?;
                let node = self.node_mut(ino)?;
                node.mode = (node.mode & libc::S_IFMT) | (mode & 0o7777);
                node.ctime = now();
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Chown { path, uid, gid } => {
                let ino = self.resolve(&path)?;
                let node = self.node_mut(ino)?;
                if let Some(uid) = uid {
                    node.uid = uid;
                }
                if let Some(gid) = gid {
                    node.gid = gid;
                }
                node.ctime = now();
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Truncate { path, size } => {
                let ino = self.resolve(&path)?;
                self.resize(ino, size)?;
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Fsync { fh } => {
                self.open_file(fh)?;
                Ok(RemoteReply::Done)
            }
            RemoteRequest::Statvfs { path } => {
                self.resolve(&path)?;
                Ok(RemoteReply::StatVfs(self.statvfs()))
            }
        }
    }

    /// Attributes of `path`, for inspecting the export from tests and tools.
    pub fn lstat(&self, path: &str) -> Result<RemoteStat, i32> {
        let ino = self.resolve(path)?;
        Ok(self.stat_of(ino))
    }

    /// Open remote file handles.
    pub fn open_handles(&self) -> usize {
        self.open.len()
    }

    fn node(&self, ino: u64) -> Result<&Node, i32> {
        self.nodes.get(&ino).ok_or(libc::ESTALE)
    }

    fn node_mut(&mut self, ino: u64) -> Result<&mut Node, i32> {
        self.nodes.get_mut(&ino).ok_or(libc::ESTALE)
    }

    fn children(&self, ino: u64) -> Result<&BTreeMap<String, u64>, i32> {
        match &self.node(ino)?.kind {
            NodeKind::Directory(children) => Ok(children),
            _ => Err(libc::ENOTDIR),
        }
    }

    fn children_mut(&mut self, ino: u64) -> Result<&mut BTreeMap<String, u64>, i32> {
        match &mut self.node_mut(ino)?.kind {
            NodeKind::Directory(children) => Ok(children),
            _ => Err(libc::ENOTDIR),
        }
    }

    fn resolve(&self, path: &str) -> Result<u64, i32> {
        let mut ino = ROOT_INO;
        for component in split(path) {
            if component == ".." {
                return Err(libc::EINVAL);
            }
            ino = *self.children(ino)?.get(component).ok_or(libc::ENOENT)?;
        }
        Ok(ino)
    }

    /// Parent directory inode and final component of `path`.
    fn resolve_parent<'p>(&self, path: &'p str) -> Result<(u64, &'p str), i32> {
        let components: Vec<&str> = split(path).collect();
        let (name, dirs) = components.split_last().ok_or(libc::EINVAL)?;
        if *name == ".." {
            return Err(libc::EINVAL);
        }
        if name.len() > NAME_MAX {
            return Err(libc::ENAMETOOLONG);
        }
        let mut ino = ROOT_INO;
        for component in dirs {
            if *component == ".." {
                return Err(libc::EINVAL);
            }
            ino = *self.children(ino)?.get(*component).ok_or(libc::ENOENT)?;
        }
        self.children(ino)?;
        Ok((ino, name))
    }

    fn insert_new(&mut self, path: &str, node: Node) -> Result<u64, i32> {
        let (parent, name) = self.resolve_parent(path)?;
        if self.children(parent)?.contains_key(name) {
            return Err(libc::EEXIST);
        }
        let is_dir = node.is_dir();
        let ino = self.next_ino;
        self.next_ino += 1;
        self.nodes.insert(ino, node);
        self.children_mut(parent)?.insert(name.to_string(), ino);
        let parent_node = self.node_mut(parent)?;
        if is_dir {
            parent_node.nlink += 1;
        }
        parent_node.touch();
        Ok(ino)
    }

    fn stat_of(&self, ino: u64) -> RemoteStat {
        let Some(node) = self.nodes.get(&ino) else {
            return RemoteStat::default();
        };
        let size = node.size();
        RemoteStat {
            dev: 0x4e46_5301,
            ino,
            mode: node.mode,
            nlink: node.nlink,
            uid: node.uid,
            gid: node.gid,
            rdev: match node.kind {
                NodeKind::Special { rdev } => rdev,
                _ => 0,
            },
            size,
            blksize: BLOCK_SIZE,
            blocks: size.div_ceil(512),
            atime: node.atime,
            mtime: node.mtime,
            ctime: node.ctime,
        }
    }

    fn opendir(&self, path: &str) -> OpResult {
        let ino = self.resolve(path)?;
        let entries = self
            .children(ino)?
            .iter()
            .map(|(name, &child)| RemoteDirEntry {
                name: name.clone(),
                ino: child,
                mode: self.nodes.get(&child).map(|n| n.mode).unwrap_or(0),
            })
            .collect();
        Ok(RemoteReply::Dir(entries))
    }

    fn open(&mut self, path: &str, flags: i32, credentials: Identity) -> OpResult {
        let writable = flags & libc::O_ACCMODE != libc::O_RDONLY;
        let ino = match self.resolve(path) {
            Ok(_) if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 => {
                return Err(libc::EEXIST)
            }
            Ok(ino) => ino,
            Err(libc::ENOENT) if flags & libc::O_CREAT != 0 => {
                let node = Node::new(
                    NodeKind::File(Vec::new()),
                    libc::S_IFREG | 0o644,
                    credentials,
                );
                let ino = self.insert_new(path, node)?;
                return Ok(RemoteReply::Opened(self.new_handle(ino, writable)));
            }
            Err(e) => return Err(e),
        };
        match &self.node(ino)?.kind {
            NodeKind::Directory(_) if writable => return Err(libc::EISDIR),
            NodeKind::Symlink(_) => return Err(libc::ELOOP),
            _ => {}
        }
        if writable && flags & libc::O_TRUNC != 0 {
            self.resize(ino, 0)?;
        }
        Ok(RemoteReply::Opened(self.new_handle(ino, writable)))
    }

    fn creat(&mut self, path: &str, mode: u32, owner: Identity) -> OpResult {
        let ino = match self.resolve(path) {
            Ok(ino) => {
                if self.node(ino)?.is_dir() {
                    return Err(libc::EISDIR);
                }
                self.resize(ino, 0)?;
                ino
            }
            Err(libc::ENOENT) => {
                let node = Node::new(
                    NodeKind::File(Vec::new()),
                    libc::S_IFREG | (mode & 0o7777),
                    owner,
                );
                self.insert_new(path, node)?
            }
            Err(e) => return Err(e),
        };
        Ok(RemoteReply::Opened(self.new_handle(ino, true)))
    }

    fn new_handle(&mut self, ino: u64, writable: bool) -> RemoteFh {
        let fh = self.next_fh;
        self.next_fh += 1;
        self.open.insert(fh, OpenFile { ino, writable });
        RemoteFh(fh)
    }

    fn open_file(&self, fh: RemoteFh) -> Result<OpenFile, i32> {
        self.open.get(&fh.0).copied().ok_or(libc::EBADF)
    }

    fn close(&mut self, fh: RemoteFh) -> OpResult {
        let file = self.open.remove(&fh.0).ok_or(libc::EBADF)?;
        self.collect(file.ino);
        Ok(RemoteReply::Done)
    }

    fn pread(&mut self, fh: RemoteFh, offset: u64, count: u32) -> OpResult {
        let file = self.open_file(fh)?;
        let node = self.node_mut(file.ino)?;
        let NodeKind::File(data) = &node.kind else {
            return Err(libc::EISDIR);
        };
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(count as usize).min(data.len());
        let bytes = data[start..end].to_vec();
        node.atime = now();
        Ok(RemoteReply::Data(bytes))
    }

    fn pwrite(&mut self, fh: RemoteFh, offset: u64, bytes: &[u8]) -> OpResult {
        let file = self.open_file(fh)?;
        if !file.writable {
            return Err(libc::EBADF);
        }
        let node = self.node_mut(file.ino)?;
        let NodeKind::File(data) = &mut node.kind else {
            return Err(libc::EISDIR);
        };
        let end = offset
            .checked_add(bytes.len() as u64)
            .filter(|&end| end <= MAX_FILE_SIZE)
            .ok_or(libc::EFBIG)?;
        let (start, end) = (offset as usize, end as usize);
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        node.touch();
        Ok(RemoteReply::Written(bytes.len() as u32))
    }

    fn resize(&mut self, ino: u64, size: u64) -> Result<(), i32> {
        if size > MAX_FILE_SIZE {
            return Err(libc::EFBIG);
        }
        let node = self.node_mut(ino)?;
        match &mut node.kind {
            NodeKind::File(data) => data.resize(size as usize, 0),
            NodeKind::Directory(_) => return Err(libc::EISDIR),
            _ => return Err(libc::EINVAL),
        }
        node.touch();
        Ok(())
    }

    fn unlink(&mut self, path: &str) -> OpResult {
        let (parent, name) = self.resolve_parent(path)?;
        let ino = *self.children(parent)?.get(name).ok_or(libc::ENOENT)?;
        if self.node(ino)?.is_dir() {
            return Err(libc::EISDIR);
        }
        self.children_mut(parent)?.remove(name);
        self.node_mut(parent)?.touch();
        let node = self.node_mut(ino)?;
        node.nlink -= 1;
        node.ctime = now();
        self.collect(ino);
        Ok(RemoteReply::Done)
    }

    fn rmdir(&mut self, path: &str) -> OpResult {
        let (parent, name) = self.resolve_parent(path)?;
        let ino = *self.children(parent)?.get(name).ok_or(libc::ENOENT)?;
        if !self.children(ino)?.is_empty() {
            return Err(libc::ENOTEMPTY);
        }
        self.children_mut(parent)?.remove(name);
        self.nodes.remove(&ino);
        let parent_node = self.node_mut(parent)?;
        parent_node.nlink -= 1;
        parent_node.touch();
        Ok(RemoteReply::Done)
    }

    /// Drop a node once it has no links and no open handles.
    fn collect(&mut self, ino: u64) {
        let unlinked = self.nodes.get(&ino).is_some_and(|n| n.nlink == 0);
        if unlinked && !self.open.values().any(|f| f.ino == ino) {
            self.nodes.remove(&ino);
        }
    }

    /// True if `ancestor` lies on the way down `path`.
    fn is_ancestor(&self, ancestor: u64, path: &str) -> bool {
        let mut current = ROOT_INO;
        for component in split(path) {
            if current == ancestor {
                return true;
            }
            match self.children(current).ok().and_then(|c| c.get(component)) {
                Some(&next) => current = next,
                None => return false,
            }
        }
        current == ancestor
    }

    fn rename(&mut self, from: &str, to: &str) -> OpResult {
        let (src_parent, src_name) = self.resolve_parent(from)?;
        let ino = *self.children(src_parent)?.get(src_name).ok_or(libc::ENOENT)?;
        let (dst_parent, dst_name) = self.resolve_parent(to)?;
        let moving_dir = self.node(ino)?.is_dir();

        if src_parent == dst_parent && src_name == dst_name {
            return Ok(RemoteReply::Done);
        }
        if moving_dir && self.is_ancestor(ino, to) {
            return Err(libc::EINVAL);
        }

        if let Some(&existing) = self.children(dst_parent)?.get(dst_name) {
            if existing == ino {
                // Both names are links to the same file.
                return Ok(RemoteReply::Done);
            }
            let existing_node = self.node(existing)?;
            match (moving_dir, existing_node.is_dir()) {
                (true, false) => return Err(libc::ENOTDIR),
                (false, true) => return Err(libc::EISDIR),
                (true, true) if !self.children(existing)?.is_empty() => {
                    return Err(libc::ENOTEMPTY)
                }
                _ => {}
            }
            if existing_node.is_dir() {
                self.nodes.remove(&existing);
                self.node_mut(dst_parent)?.nlink -= 1;
            } else {
                self.node_mut(existing)?.nlink -= 1;
                self.collect(existing);
            }
        }

        self.children_mut(src_parent)?.remove(src_name);
        self.children_mut(dst_parent)?.insert(dst_name.to_string(), ino);
        if moving_dir && src_parent != dst_parent {
            self.node_mut(src_parent)?.nlink -= 1;
            self.node_mut(dst_parent)?.nlink += 1;
        }
        self.node_mut(src_parent)?.touch();
        self.node_mut(dst_parent)?.touch();
        self.node_mut(ino)?.ctime = now();
        Ok(RemoteReply::Done)
    }

    fn link(&mut self, from: &str, to: &str) -> OpResult {
        let ino = self.resolve(from)?;
        if self.node(ino)?.is_dir() {
            return Err(libc::EPERM);
        }
        let (parent, name) = self.resolve_parent(to)?;
        if self.children(parent)?.contains_key(name) {
            return Err(libc::EEXIST);
        }
        self.children_mut(parent)?.insert(name.to_string(), ino);
        self.node_mut(parent)?.touch();
        let node = self.node_mut(ino)?;
        node.nlink += 1;
        node.ctime = now();
        Ok(RemoteReply::Done)
    }

    fn statvfs(&self) -> RemoteStatVfs {
        let used_blocks: u64 = self
            .nodes
            .values()
            .map(|n| n.size().div_ceil(BLOCK_SIZE as u64).max(1))
            .sum();
        let free = TOTAL_BLOCKS.saturating_sub(used_blocks);
        let ffree = MAX_FILES.saturating_sub(self.nodes.len() as u64);
        RemoteStatVfs {
            bsize: BLOCK_SIZE,
            frsize: BLOCK_SIZE,
            blocks: TOTAL_BLOCKS,
            bfree: free,
            bavail: free,
            files: MAX_FILES,
            ffree,
            favail: ffree,
            fsid: 0x4e46_5301,
            flag: 0,
            namemax: NAME_MAX as u32,
        }
    }
}
