// FILE: src/drive.rs
//! Note Drive: the FUSE face of the adapter.
//!
//! The kernel talks in inodes, the adapter in paths. Each callback translates
//! inode -> path through the InodeStore, then hands the work (and the reply) to
//! tokio's blocking pool so a slow transaction never stalls the FUSE loop.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use fuser::{
    FileAttr, FileType, Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyWrite, Request,
};
use tokio::runtime::Handle;
use crate::adapter::{Adapter, Attr};
use crate::core::inode_store::InodeStore;
use crate::core::permissions::Identity;
use crate::error::{NoteFsError, Result};
use crate::resolver::join_path;
use crate::storage::EntityKind;

const BLOCK_SIZE: u32 = 4096;

/// Everything a dispatched call needs, cheap to clone into a task.
#[derive(Clone)]
struct Worker {
    adapter: Arc<Adapter>,
    inodes: Arc<InodeStore>,
    identity: Identity,
    ttl: Duration,
}

impl Worker {
    fn path(&self, ino: u64) -> Result<String> {
        let target = self.inodes.get_target(ino)
            .ok_or_else(|| NoteFsError::NotFound(format!("inode {}", ino)))?;
        self.adapter.path_of(&target)
    }

    fn child_path(&self, parent: u64, name: &OsStr) -> Result<String> {
        let name = name.to_str()
            .ok_or_else(|| NoteFsError::InvalidName(format!("{:?} is not UTF-8", name)))?;
        Ok(join_path(&self.path(parent)?, name))
    }

    fn file_attr(&self, attr: &Attr) -> FileAttr {
        let ino = self.inodes.get_or_create_inode(&attr.target);
        FileAttr {
            ino,
            size: attr.size,
            blocks: (attr.size + 511) / 512,
            atime: SystemTime::from(attr.atime()),
            mtime: SystemTime::from(attr.mtime()),
            ctime: SystemTime::from(attr.ctime()),
            crtime: SystemTime::from(attr.crtime()),
            kind: file_type(attr.kind),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: self.identity.uid,
            gid: self.identity.gid,
            rdev: 0,
            blksize: BLOCK_SIZE,
            flags: 0,
        }
    }
}

fn file_type(kind: EntityKind) -> FileType {
    match kind {
        EntityKind::Folder => FileType::Directory,
        EntityKind::Note => FileType::RegularFile,
    }
}

/// Log and convert to the errno the kernel gets.
fn errno(op: &str, e: &NoteFsError) -> i32 {
    match e {
        NoteFsError::NotFound(_) => tracing::debug!("[NoteDrive] {}: {}", op, e),
        _ if e.is_transient() => tracing::warn!("[NoteDrive] {}: {} (caller may retry)", op, e),
        NoteFsError::AlreadyExists(_) | NoteFsError::NotEmpty(_) | NoteFsError::InvalidName(_)
        | NoteFsError::CycleRejected(_) | NoteFsError::TypeMismatch { .. } => {
            tracing::debug!("[NoteDrive] {} rejected: {}", op, e)
        }
        _ => tracing::error!("[NoteDrive] {} failed: {}", op, e),
    }
    e.errno()
}

pub struct NoteDrive {
    worker: Worker,
    runtime: Handle,
}

impl NoteDrive {
    pub fn new(adapter: Arc<Adapter>, identity: Identity, ttl: Duration, runtime: Handle) -> Self {
        Self {
            worker: Worker { adapter, inodes: Arc::new(InodeStore::new()), identity, ttl },
            runtime,
        }
    }

    fn dispatch<F>(&self, job: F)
    where
        F: FnOnce(Worker) + Send + 'static,
    {
        let worker = self.worker.clone();
        // Detached; the reply travels inside the job
        drop(self.runtime.spawn_blocking(move || job(worker)));
    }
}

impl Filesystem for NoteDrive {
    fn init(&mut self, _req: &Request, _config: &mut fuser::KernelConfig) -> std::result::Result<(), i32> {
        tracing::info!("[NoteDrive] FUSE initialized for user '{}'", self.worker.adapter.owner());
        Ok(())
    }

    fn destroy(&mut self) {
        let released = self.worker.adapter.release_all();
        tracing::info!("[NoteDrive] Unmounted ({} handles flushed)", released);
    }

    fn lookup(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = name.to_owned();
        self.dispatch(move |w| {
            let result = w.child_path(parent, &name).and_then(|path| w.adapter.lookup(&path));
            match result {
                Ok(attr) => reply.entry(&w.ttl, &w.file_attr(&attr), 0),
                Err(e) => reply.error(errno("lookup", &e)),
            }
        });
    }

    fn getattr(&mut self, _req: &Request, ino: u64, reply: ReplyAttr) {
        self.dispatch(move |w| {
            match w.path(ino).and_then(|path| w.adapter.getattr(&path)) {
                Ok(attr) => reply.attr(&w.ttl, &w.file_attr(&attr)),
                Err(e) => reply.error(errno("getattr", &e)),
            }
        });
    }

    fn setattr(
        &mut self,
        _req: &Request,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<fuser::TimeOrNow>,
        _mtime: Option<fuser::TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        // Only size changes mean anything here; timestamps come from the rows
        self.dispatch(move |w| {
            let result = w.path(ino).and_then(|path| {
                if let Some(size) = size {
                    w.adapter.truncate(&path, size, fh)?;
                }
                w.adapter.getattr(&path)
            });
            match result {
                Ok(attr) => reply.attr(&w.ttl, &w.file_attr(&attr)),
                Err(e) => reply.error(errno("setattr", &e)),
            }
        });
    }

    fn readdir(&mut self, _req: &Request, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        self.dispatch(move |w| {
            let items = match w.path(ino).and_then(|path| w.adapter.readdir(&path)) {
                Ok(items) => items,
                Err(e) => { reply.error(errno("readdir", &e)); return; }
            };
            for (i, item) in items.iter().enumerate().skip(offset.max(0) as usize) {
                let child = w.inodes.get_or_create_inode(&item.target);
                if reply.add(child, (i + 1) as i64, file_type(item.kind), &item.name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn mkdir(&mut self, _req: &Request, parent: u64, name: &OsStr, _mode: u32, _umask: u32, reply: ReplyEntry) {
        let name = name.to_owned();
        self.dispatch(move |w| {
            match w.child_path(parent, &name).and_then(|path| w.adapter.mkdir(&path)) {
                Ok(attr) => reply.entry(&w.ttl, &w.file_attr(&attr), 0),
                Err(e) => reply.error(errno("mkdir", &e)),
            }
        });
    }

    fn rmdir(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_owned();
        self.dispatch(move |w| {
            let result = w.child_path(parent, &name).and_then(|path| {
                let target = w.adapter.lookup(&path).map(|a| a.target).ok();
                w.adapter.rmdir(&path)?;
                if let Some(target) = target {
                    w.inodes.forget(&target);
                }
                Ok(())
            });
            match result {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("rmdir", &e)),
            }
        });
    }

    fn create(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let name = name.to_owned();
        self.dispatch(move |w| {
            match w.child_path(parent, &name).and_then(|path| w.adapter.create(&path)) {
                Ok((attr, fh)) => reply.created(&w.ttl, &w.file_attr(&attr), 0, fh, 0),
                Err(e) => reply.error(errno("create", &e)),
            }
        });
    }

    fn open(&mut self, _req: &Request, ino: u64, flags: i32, reply: ReplyOpen) {
        let truncate = flags & libc::O_TRUNC != 0;
        self.dispatch(move |w| {
            match w.path(ino).and_then(|path| w.adapter.open(&path, truncate)) {
                Ok(fh) => reply.opened(fh, 0),
                Err(e) => reply.error(errno("open", &e)),
            }
        });
    }

    fn read(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.dispatch(move |w| {
            match w.adapter.read(fh, offset.max(0) as u64, size as usize) {
                Ok(bytes) => reply.data(&bytes),
                Err(e) => reply.error(errno("read", &e)),
            }
        });
    }

    fn write(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let data = data.to_vec();
        self.dispatch(move |w| {
            match w.adapter.write(fh, offset.max(0) as u64, &data) {
                Ok(written) => reply.written(written as u32),
                Err(e) => reply.error(errno("write", &e)),
            }
        });
    }

    fn flush(&mut self, _req: &Request, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        self.dispatch(move |w| {
            match w.adapter.flush(fh) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("flush", &e)),
            }
        });
    }

    fn release(
        &mut self,
        _req: &Request,
        _ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.dispatch(move |w| {
            match w.adapter.release(fh) {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("release", &e)),
            }
        });
    }

    fn unlink(&mut self, _req: &Request, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = name.to_owned();
        self.dispatch(move |w| {
            let result = w.child_path(parent, &name).and_then(|path| {
                let target = w.adapter.lookup(&path).map(|a| a.target).ok();
                w.adapter.unlink(&path)?;
                if let Some(target) = target {
                    w.inodes.forget(&target);
                }
                Ok(())
            });
            match result {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(errno("unlink", &e)),
            }
        });
    }

    fn rename(
        &mut self,
        _req: &Request,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        _flags: u32,
        reply: ReplyEmpty,
    ) {
        let name = name.to_owned();
        let newname = newname.to_owned();
        self.dispatch(move |w| {
            let result = w.child_path(parent, &name)
                .and_then(|from| Ok((from, w.child_path(newparent, &newname)?)))
                .and_then(|(from, to)| w.adapter.rename(&from, &to));
            match result {
                Ok(moved) => {
                    for (old, new) in moved {
                        w.inodes.retarget(&old, &new);
                    }
                    reply.ok()
                }
                Err(e) => reply.error(errno("rename", &e)),
            }
        });
    }
}
