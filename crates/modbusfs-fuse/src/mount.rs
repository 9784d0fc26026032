//! `fuser::Filesystem` adapter over [`ModbusFs`].
//!
//! fuser hands us inodes and file handles; the kernel works on paths and
//! [`OpenFile`] values. This module translates between the two and nothing
//! else.
//!
//! The fuser session loop dispatches one request at a time. Metadata
//! operations never touch the device and answer inline. Reads and writes
//! are spawned onto the tokio runtime with a copy of the open file and reply
//! from there, so a slow or dead slave only stalls the callers waiting on
//! the link.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use fuser::consts::{FOPEN_DIRECT_IO, FOPEN_NONSEEKABLE};
use fuser::{
    MountOption, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen,
    ReplyWrite, Request, TimeOrNow,
};
use libc::c_int;
use tokio::runtime::Handle;

use modbusfs_kernel::{FileAttr, FileType, ModbusFs, Node, OpenFile, OpenMode};

use crate::errno;
use crate::inode;

const TTL: Duration = Duration::from_secs(1);
const BLOCK_SIZE: u32 = 512;

/// How to mount.
#[derive(Debug, Clone, Default)]
pub struct MountConfig {
    pub allow_other: bool,
    /// Extra comma-separated FUSE options, passed through untouched.
    pub options: Vec<String>,
}

impl MountConfig {
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![MountOption::FSName("modbusfs".to_owned())];
        // fusermount only honours auto_unmount for unprivileged users
        // together with allow_other
        if self.allow_other {
            options.push(MountOption::AllowOther);
            options.push(MountOption::AutoUnmount);
        }
        options.extend(
            self.options
                .iter()
                .flat_map(|o| o.split(','))
                .filter(|o| !o.is_empty())
                .map(|o| MountOption::CUSTOM(o.to_owned())),
        );
        options
    }
}

/// Mount `fs` at `at` and serve until unmounted.
///
/// Blocks the calling thread; run it from `spawn_blocking`.
pub fn mount(fs: Arc<ModbusFs>, runtime: Handle, at: &Path, config: &MountConfig) -> Result<()> {
    let filesystem = ModbusFuse::new(fs, runtime);
    let options = config.mount_options();
    tracing::info!(mountpoint = %at.display(), ?options, "mounting");
    fuser::mount2(filesystem, at, &options).with_context(|| format!("mount {}", at.display()))?;
    tracing::info!(mountpoint = %at.display(), "unmounted");
    Ok(())
}

// ============================================================================
// Handle table
// ============================================================================

/// Open files keyed by the handle id given to the kernel.
#[derive(Debug)]
pub struct HandleTable {
    files: HashMap<u64, OpenFile>,
    next: u64,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            next: 1,
        }
    }
}

impl HandleTable {
    pub fn insert(&mut self, file: OpenFile) -> u64 {
        let fh = self.next;
        self.next += 1;
        self.files.insert(fh, file);
        fh
    }

    pub fn get(&self, fh: u64) -> Result<OpenFile, c_int> {
        self.files.get(&fh).copied().ok_or(libc::EBADF)
    }

    pub fn remove(&mut self, fh: u64) -> Result<OpenFile, c_int> {
        self.files.remove(&fh).ok_or(libc::EBADF)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

// ============================================================================
// Conversions
// ============================================================================

pub fn to_fuse_attr(ino: u64, attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: 0,
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: SystemTime::UNIX_EPOCH,
        kind: to_fuse_kind(attr.kind),
        perm: (attr.perm & 0o7777) as u16,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        flags: 0,
        blksize: BLOCK_SIZE,
    }
}

fn to_fuse_kind(kind: FileType) -> fuser::FileType {
    match kind {
        FileType::File => fuser::FileType::RegularFile,
        FileType::Directory => fuser::FileType::Directory,
    }
}

/// `FOPEN_*` bits reported for an open file.
pub fn open_flags(file: &OpenFile) -> u32 {
    let mut flags = 0;
    if file.direct_io() {
        flags |= FOPEN_DIRECT_IO;
    }
    if file.nonseekable() {
        flags |= FOPEN_NONSEEKABLE;
    }
    flags
}

/// One directory entry as handed to `ReplyDirectory::add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub ino: u64,
    /// Offset the kernel passes back to continue after this entry.
    pub next_offset: i64,
    pub kind: fuser::FileType,
    pub name: String,
}

/// Entries of `listing` that follow `offset`.
pub fn page(listing: Vec<(u64, fuser::FileType, String)>, offset: i64) -> Vec<ListingEntry> {
    let start = usize::try_from(offset).unwrap_or(0);
    listing
        .into_iter()
        .enumerate()
        .skip(start)
        .map(|(idx, (ino, kind, name))| ListingEntry {
            ino,
            next_offset: (idx + 1) as i64,
            kind,
            name,
        })
        .collect()
}

// ============================================================================
// Device I/O
// ============================================================================

pub async fn read_file(
    fs: Arc<ModbusFs>,
    file: OpenFile,
    offset: i64,
    size: u32,
) -> Result<Vec<u8>, c_int> {
    let offset = u64::try_from(offset).map_err(|_| libc::EINVAL)?;
    fs.read(&file, offset, size).await.map_err(|e| errno(&e))
}

pub async fn write_file(fs: Arc<ModbusFs>, file: OpenFile, data: Vec<u8>) -> Result<u32, c_int> {
    fs.write(&file, &data).await.map_err(|e| errno(&e))
}

// ============================================================================
// Adapter
// ============================================================================

pub struct ModbusFuse {
    fs: Arc<ModbusFs>,
    runtime: Handle,
    handles: HandleTable,
}

impl ModbusFuse {
    pub fn new(fs: Arc<ModbusFs>, runtime: Handle) -> Self {
        Self {
            fs,
            runtime,
            handles: HandleTable::default(),
        }
    }

    pub fn handles(&self) -> &HandleTable {
        &self.handles
    }

    fn attr(&self, node: Node) -> Result<fuser::FileAttr, c_int> {
        let ino = inode::to_ino(node).ok_or(libc::ENOENT)?;
        let attr = self.fs.getattr_node(node).map_err(|e| errno(&e))?;
        Ok(to_fuse_attr(ino, &attr))
    }

    pub fn lookup_attr(&self, parent: u64, name: &OsStr) -> Result<fuser::FileAttr, c_int> {
        let parent = inode::to_node(parent).ok_or(libc::ENOENT)?;
        let name = name.to_str().ok_or(libc::ENOENT)?;
        self.attr(parent.child(name))
    }

    pub fn node_attr(&self, ino: u64) -> Result<fuser::FileAttr, c_int> {
        self.attr(inode::to_node(ino).ok_or(libc::ENOENT)?)
    }

    pub fn truncate(&self, ino: u64, size: u64) -> Result<(), c_int> {
        let node = inode::to_node(ino).ok_or(libc::ENOENT)?;
        self.fs.truncate(&node.path(), size).map_err(|e| errno(&e))
    }

    /// Full listing of a directory inode, `.` and `..` first.
    pub fn listing(&self, ino: u64) -> Result<Vec<(u64, fuser::FileType, String)>, c_int> {
        let node = inode::to_node(ino).ok_or(libc::ENOENT)?;
        if !node.is_dir() {
            return Err(libc::ENOTDIR);
        }
        let entries = self.fs.readdir(&node.path()).map_err(|e| errno(&e))?;

        let mut listing = Vec::with_capacity(entries.len() + 2);
        listing.push((ino, fuser::FileType::Directory, ".".to_owned()));
        listing.push((
            inode::to_ino(node.parent()).unwrap_or(inode::ROOT_INO),
            fuser::FileType::Directory,
            "..".to_owned(),
        ));
        for entry in entries {
            let Some(child) = inode::to_ino(node.child(&entry.name)) else {
                continue;
            };
            listing.push((child, to_fuse_kind(entry.kind), entry.name));
        }
        Ok(listing)
    }

    /// Open `ino` and register the result; returns the handle and `FOPEN_*` bits.
    pub fn open_handle(&mut self, ino: u64, flags: i32) -> Result<(u64, u32), c_int> {
        let node = inode::to_node(ino).ok_or(libc::ENOENT)?;
        let file = self
            .fs
            .open(&node.path(), OpenMode::from_flags(flags))
            .map_err(|e| errno(&e))?;
        let fh = self.handles.insert(file);
        Ok((fh, open_flags(&file)))
    }

    pub fn release_handle(&mut self, fh: u64) -> Result<(), c_int> {
        let file = self.handles.remove(fh)?;
        self.fs.release(file);
        Ok(())
    }
}

impl fuser::Filesystem for ModbusFuse {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_attr(parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(e) => reply.error(e),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.node_attr(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // O_TRUNC on open arrives here; only truncation is meaningful
        let result = match size {
            Some(size) => self.truncate(ino, size),
            None => Ok(()),
        };
        match result.and_then(|()| self.node_attr(ino)) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(e) => reply.error(e),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let listing = match self.listing(ino) {
            Ok(listing) => listing,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        for entry in page(listing, offset) {
            if reply.add(entry.ino, entry.next_offset, entry.kind, entry.name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.open_handle(ino, flags) {
            Ok((fh, open_flags)) => reply.opened(fh, open_flags),
            Err(e) => reply.error(e),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let file = match self.handles.get(fh) {
            Ok(file) => file,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let fs = self.fs.clone();
        self.runtime.spawn(async move {
            match read_file(fs, file, offset, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        fh: u64,
        _offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let file = match self.handles.get(fh) {
            Ok(file) => file,
            Err(e) => {
                reply.error(e);
                return;
            }
        };
        let fs = self.fs.clone();
        let data = data.to_vec();
        self.runtime.spawn(async move {
            match write_file(fs, file, data).await {
                Ok(written) => reply.written(written),
                Err(e) => reply.error(e),
            }
        });
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
        match self.release_handle(fh) {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use modbusfs_kernel::{ProtocolBridge, RegisterTransport, TransportError};
    use tokio::sync::Semaphore;

    /// Transport whose reads wait for a permit; writes answer at once.
    struct GatedTransport {
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl RegisterTransport for GatedTransport {
        fn select_slave(&mut self, _address: u8) {}

        async fn read_register(&mut self, index: u16) -> Result<u16, TransportError> {
            self.gate.acquire().await.unwrap().forget();
            Ok(index)
        }

        async fn write_register(&mut self, _index: u16, _value: u16) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn adapter() -> (ModbusFuse, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let transport = GatedTransport { gate: gate.clone() };
        let fs = Arc::new(ModbusFs::new(ProtocolBridge::new(transport)));
        (ModbusFuse::new(fs, Handle::current()), gate)
    }

    fn slave_ino(address: u8) -> u64 {
        inode::to_ino(Node::SlaveDir(address)).unwrap()
    }

    fn register_ino(address: u8, index: u16) -> u64 {
        inode::to_ino(Node::Register(address, index)).unwrap()
    }

    async fn declare(fuse: &mut ModbusFuse, node: Node, line: &str) {
        let (fh, _) = fuse
            .open_handle(inode::to_ino(node).unwrap(), libc::O_WRONLY)
            .unwrap();
        let file = fuse.handles().get(fh).unwrap();
        write_file(fuse.fs.clone(), file, line.as_bytes().to_vec())
            .await
            .unwrap();
        fuse.release_handle(fh).unwrap();
    }

    fn names(listing: &[(u64, fuser::FileType, String)]) -> Vec<&str> {
        listing.iter().map(|(_, _, name)| name.as_str()).collect()
    }

    #[test]
    fn test_mount_options() {
        let config = MountConfig {
            allow_other: true,
            options: vec!["ro,noatime".into(), "default_permissions".into()],
        };
        let options = config.mount_options();
        assert_eq!(options[0], MountOption::FSName("modbusfs".into()));
        assert!(options.contains(&MountOption::AutoUnmount));
        assert!(options.contains(&MountOption::AllowOther));
        assert!(options.contains(&MountOption::CUSTOM("noatime".into())));
        assert!(options.contains(&MountOption::CUSTOM("default_permissions".into())));
        assert_eq!(options.len(), 6);
    }

    #[test]
    fn test_default_mount_options_need_no_fuse_conf() {
        let options = MountConfig::default().mount_options();
        assert_eq!(options, vec![MountOption::FSName("modbusfs".into())]);
        assert!(!options.contains(&MountOption::AutoUnmount));
        assert!(!options.contains(&MountOption::AllowOther));
    }

    #[test]
    fn test_attr_conversion() {
        let attr = FileAttr::file(4, 0o644);
        let fuse = to_fuse_attr(42, &attr);
        assert_eq!(fuse.ino, 42);
        assert_eq!(fuse.size, 4);
        assert_eq!(fuse.perm, 0o644);
        assert_eq!(fuse.kind, fuser::FileType::RegularFile);
        assert_eq!(fuse.nlink, 1);

        let dir = to_fuse_attr(1, &FileAttr::directory(0o755));
        assert_eq!(dir.kind, fuser::FileType::Directory);
        assert_eq!(dir.nlink, 2);
    }

    #[test]
    fn test_page_resumes_after_offset() {
        let listing = vec![
            (1, fuser::FileType::Directory, ".".to_owned()),
            (1, fuser::FileType::Directory, "..".to_owned()),
            (2, fuser::FileType::RegularFile, "exports".to_owned()),
            (18 << 20, fuser::FileType::Directory, "17".to_owned()),
        ];

        let all = page(listing.clone(), 0);
        assert_eq!(all.len(), 4);
        assert_eq!(all.iter().map(|e| e.next_offset).collect::<Vec<_>>(), vec![1, 2, 3, 4]);

        // The kernel resumes with the last offset it accepted
        let rest = page(listing.clone(), all[1].next_offset);
        assert_eq!(rest.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["exports", "17"]);
        assert_eq!(rest[0].next_offset, 3);

        assert!(page(listing.clone(), 4).is_empty());
        assert_eq!(page(listing, -1).len(), 4);
    }

    #[tokio::test]
    async fn test_handle_table() {
        let (fuse, _gate) = adapter();
        let file = fuse.fs.open("/exports", OpenMode::WriteOnly).unwrap();

        let mut table = HandleTable::default();
        assert!(table.is_empty());
        let a = table.insert(file);
        let b = table.insert(file);
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(table.get(a), Ok(file));

        assert_eq!(table.remove(a), Ok(file));
        assert_eq!(table.get(a), Err(libc::EBADF));
        assert_eq!(table.remove(a), Err(libc::EBADF));
        assert_eq!(table.len(), 1);

        // Ids are never reused
        assert!(table.insert(file) > b);
    }

    #[tokio::test]
    async fn test_listing_has_dot_entries() {
        let (mut fuse, _gate) = adapter();
        declare(&mut fuse, Node::GlobalExports, "17 0755").await;
        declare(&mut fuse, Node::SlaveExports(17), "5 0644").await;

        let root = fuse.listing(inode::ROOT_INO).unwrap();
        assert_eq!(names(&root), vec![".", "..", "exports", "17"]);
        assert_eq!(root[0].0, inode::ROOT_INO);
        assert_eq!(root[1].0, inode::ROOT_INO);
        assert_eq!(root[3], (slave_ino(17), fuser::FileType::Directory, "17".to_owned()));

        let slave = fuse.listing(slave_ino(17)).unwrap();
        assert_eq!(names(&slave), vec![".", "..", "exports", "5"]);
        assert_eq!(slave[0].0, slave_ino(17));
        assert_eq!(slave[1].0, inode::ROOT_INO);
        assert_eq!(slave[3].0, register_ino(17, 5));
        assert_eq!(slave[3].1, fuser::FileType::RegularFile);

        assert_eq!(fuse.listing(register_ino(17, 5)), Err(libc::ENOTDIR));
        assert_eq!(fuse.listing(slave_ino(18)), Err(libc::ENOENT));
        assert_eq!(fuse.listing(3), Err(libc::ENOENT));
    }

    #[tokio::test]
    async fn test_lookup_and_getattr() {
        let (mut fuse, _gate) = adapter();
        declare(&mut fuse, Node::GlobalExports, "17 0700").await;

        let attr = fuse.lookup_attr(inode::ROOT_INO, OsStr::new("17")).unwrap();
        assert_eq!(attr.ino, slave_ino(17));
        assert_eq!(attr.perm, 0o700);
        assert_eq!(attr.kind, fuser::FileType::Directory);

        assert_eq!(fuse.lookup_attr(inode::ROOT_INO, OsStr::new("18")).unwrap_err(), libc::ENOENT);
        assert_eq!(fuse.lookup_attr(slave_ino(17), OsStr::new("5")).unwrap_err(), libc::ENOENT);
        assert_eq!(fuse.node_attr(inode::GLOBAL_EXPORTS_INO).unwrap().perm, 0o200);
        assert_eq!(fuse.node_attr(0).unwrap_err(), libc::ENOENT);

        fuse.truncate(inode::GLOBAL_EXPORTS_INO, 0).unwrap();
    }

    #[tokio::test]
    async fn test_open_and_release() {
        let (mut fuse, _gate) = adapter();
        declare(&mut fuse, Node::GlobalExports, "17 0755").await;
        declare(&mut fuse, Node::SlaveExports(17), "5 0444").await;
        assert!(fuse.handles().is_empty());

        let (fh, flags) = fuse.open_handle(register_ino(17, 5), libc::O_RDONLY).unwrap();
        assert_eq!(flags, FOPEN_DIRECT_IO | FOPEN_NONSEEKABLE);
        assert_eq!(fuse.handles().len(), 1);

        assert_eq!(fuse.open_handle(register_ino(17, 5), libc::O_WRONLY), Err(libc::EACCES));
        assert_eq!(fuse.open_handle(inode::ROOT_INO, libc::O_RDONLY), Err(libc::EISDIR));
        assert_eq!(fuse.open_handle(inode::GLOBAL_EXPORTS_INO, libc::O_RDONLY), Err(libc::EACCES));
        assert_eq!(fuse.handles().len(), 1);

        fuse.release_handle(fh).unwrap();
        assert!(fuse.handles().is_empty());
        assert_eq!(fuse.release_handle(fh), Err(libc::EBADF));
        assert_eq!(fuse.handles().get(fh), Err(libc::EBADF));
    }

    #[tokio::test]
    async fn test_negative_read_offset() {
        let (mut fuse, _gate) = adapter();
        declare(&mut fuse, Node::GlobalExports, "17 0755").await;
        declare(&mut fuse, Node::SlaveExports(17), "5 0444").await;
        let (fh, _) = fuse.open_handle(register_ino(17, 5), libc::O_RDONLY).unwrap();
        let file = fuse.handles().get(fh).unwrap();
        assert_eq!(read_file(fuse.fs.clone(), file, -1, 4).await, Err(libc::EINVAL));
        assert_eq!(read_file(fuse.fs.clone(), file, 0, 2).await, Err(libc::EIO));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_metadata_answers_while_a_read_is_stalled() {
        let (mut fuse, gate) = adapter();
        declare(&mut fuse, Node::GlobalExports, "17 0755").await;
        declare(&mut fuse, Node::SlaveExports(17), "5 0444").await;

        let (fh, _) = fuse.open_handle(register_ino(17, 5), libc::O_RDONLY).unwrap();
        let file = fuse.handles().get(fh).unwrap();
        let stalled = tokio::spawn(read_file(fuse.fs.clone(), file, 0, 4096));
        tokio::task::yield_now().await;
        assert!(!stalled.is_finished());

        // Everything that does not need the link keeps working
        let root = fuse.listing(inode::ROOT_INO).unwrap();
        assert_eq!(names(&root), vec![".", "..", "exports", "17"]);
        assert!(fuse.node_attr(register_ino(17, 5)).is_ok());
        declare(&mut fuse, Node::GlobalExports, "18 0755").await;
        assert!(fuse.lookup_attr(inode::ROOT_INO, OsStr::new("18")).is_ok());
        fuse.release_handle(fh).unwrap();
        assert!(!stalled.is_finished());

        // The in-flight read finishes on its own copy of the open file
        gate.add_permits(1);
        assert_eq!(stalled.await.unwrap(), Ok(b"5".to_vec()));
    }
}
