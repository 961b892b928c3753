use std::ffi::OsStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use dashmap::DashMap;
use fuser::{FileAttr, FileType, Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, Request};
use tracing::{debug, trace, warn};

use crate::assembler::Assembler;
use crate::context::CoreContext;
use crate::prefetch::Prefetcher;

const TTL: Duration = Duration::from_secs(1);
const ROOT_INO: u64 = 1;

/// Bridges fuser's synchronous callback API to the async core. Inodes are
/// assigned on first sight and stable for process lifetime; there is no
/// directory hierarchy beyond the single root.
pub struct HttpFs {
    ctx: Arc<CoreContext>,
    runtime: tokio::runtime::Handle,
    inodes: DashMap<String, u64, ahash::RandomState>,
    names: DashMap<u64, String, ahash::RandomState>,
    next_ino: AtomicU64,
}

impl HttpFs {
    pub fn new(ctx: Arc<CoreContext>, runtime: tokio::runtime::Handle) -> Self {
        Self {
            ctx,
            runtime,
            inodes: DashMap::with_hasher(ahash::RandomState::default()),
            names: DashMap::with_hasher(ahash::RandomState::default()),
            next_ino: AtomicU64::new(2),
        }
    }

    fn ino_for(&self, filename: &str) -> u64 {
        if let Some(ino) = self.inodes.get(filename) {
            return *ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
        self.inodes.insert(filename.to_string(), ino);
        self.names.insert(ino, filename.to_string());
        ino
    }

    fn file_attr(ino: u64, size: u64) -> FileAttr {
        FileAttr {
            ino,
            size,
            blocks: size.div_ceil(512),
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind: FileType::RegularFile,
            perm: 0o444,
            nlink: 1,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    fn dir_attr() -> FileAttr {
        FileAttr {
            ino: ROOT_INO,
            size: 0,
            blocks: 0,
            atime: UNIX_EPOCH,
            mtime: UNIX_EPOCH,
            ctime: UNIX_EPOCH,
            crtime: UNIX_EPOCH,
            kind: FileType::Directory,
            perm: 0o555,
            nlink: 2,
            uid: 0,
            gid: 0,
            rdev: 0,
            blksize: 512,
            flags: 0,
        }
    }

    /// Resolves `ino` to a registered filename; `None` for an unknown inode.
    fn name_for(&self, ino: u64) -> Option<String> {
        self.names.get(&ino).map(|n| n.clone())
    }
}

impl Filesystem for HttpFs {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        if parent != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        let Some(name) = name.to_str() else {
            reply.error(libc::EINVAL);
            return;
        };
        if !self.ctx.registry.contains(name) {
            reply.error(libc::ENOENT);
            return;
        }

        let ino = self.ino_for(name);
        let record = match self.ctx.registry.get(name) {
            Ok(r) => r,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        let ctx = self.ctx.clone();
        let size = self.runtime.block_on(async move { ctx.registry.content_length(&record).await });
        reply.entry(&TTL, &Self::file_attr(ino, size), 0);
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        if ino == ROOT_INO {
            reply.attr(&TTL, &Self::dir_attr());
            return;
        }
        let Some(name) = self.name_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let record = match self.ctx.registry.get(&name) {
            Ok(r) => r,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };
        let ctx = self.ctx.clone();
        let size = self.runtime.block_on(async move { ctx.registry.content_length(&record).await });
        reply.attr(&TTL, &Self::file_attr(ino, size));
    }

    fn readdir(&mut self, _req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        if ino != ROOT_INO {
            reply.error(libc::ENOENT);
            return;
        }
        debug!(offset, "readdir");

        let mut entries = vec![(ROOT_INO, FileType::Directory, ".".to_string()), (ROOT_INO, FileType::Directory, "..".to_string())];
        for filename in self.ctx.registry.list() {
            let ino = self.ino_for(&filename);
            entries.push((ino, FileType::RegularFile, filename));
        }

        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(offset as usize) {
            if reply.add(ino, (i + 1) as i64, kind, &name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        const WRITE_FLAGS: i32 = libc::O_WRONLY | libc::O_RDWR;
        if flags & WRITE_FLAGS != 0 {
            reply.error(libc::EACCES);
            return;
        }
        let Some(name) = self.name_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let record = match self.ctx.registry.get(&name) {
            Ok(r) => r,
            Err(e) => {
                reply.error(e.to_errno());
                return;
            }
        };

        let ctx = self.ctx.clone();
        self.runtime.spawn(async move {
            let Ok(resolved) = ctx.registry.resolved_url(&record).await else {
                return;
            };
            let size = ctx.registry.content_length(&record).await;
            Prefetcher::spawn_warmup(&ctx, resolved, size);
        });

        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(name) = self.name_for(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        trace!(ino, offset, size, "read");

        let ctx = self.ctx.clone();
        let offset = offset.max(0) as u64;
        let result = self
            .runtime
            .block_on(async move { Assembler::read(&ctx, &name, offset, size as u64).await });

        match result {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!(error = %e, "read failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        reply.ok();
    }
}
