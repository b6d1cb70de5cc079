//! Vnodes and the vnode operation table (`spec.md` §4.6, §3 data model).
//!
//! `spec.md` calls for a dispatch table of per-filesystem operations, the
//! same role the teacher's `fs::Itable`/inode methods play for its one
//! built-in filesystem. Here any number of concrete filesystem/device
//! implementations can plug in by implementing [`VnodeOps`], and ops a given
//! implementation doesn't support default to [`Errno::Enosys`] rather than
//! requiring every implementor to spell out every one of the 22 operations
//! — the idiomatic-Rust equivalent of OS/161's per-fs operations vector
//! where unsupported slots point at a shared "not supported" stub.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::errno::{Errno, KResult};

use super::uio::Uio;

/// What kind of object a vnode names (`spec.md` §4.6 `VOP_GETTYPE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VnodeType {
    File,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
}

/// Metadata returned by `VOP_STAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VnodeStat {
    pub size: u64,
    pub kind: Option<VnodeType>,
    pub links: u32,
}

impl VnodeStat {
    pub fn new(kind: VnodeType, size: u64, links: u32) -> Self {
        Self { size, kind: Some(kind), links }
    }
}

/// The 22-operation dispatch table every concrete vnode implementation
/// (filesystem inode, device) provides (`spec.md` §4.6). Every method
/// defaults to `Enosys` so an implementor only overrides what it supports —
/// a char device, for instance, only meaningfully implements `eachopen`,
/// `read`, `write` and `ioctl`.
pub trait VnodeOps: Send + Sync {
    fn eachopen(&self, _flags: i32) -> KResult<()> {
        Ok(())
    }
    fn reclaim(&self) -> KResult<()> {
        Ok(())
    }
    fn read(&self, _uio: &mut Uio<'_>) -> KResult<usize> {
        Err(Errno::Enosys)
    }
    fn write(&self, _uio: &mut Uio<'_>) -> KResult<usize> {
        Err(Errno::Enosys)
    }
    fn ioctl(&self, _code: u32, _data: usize) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn stat(&self) -> KResult<VnodeStat> {
        Err(Errno::Enosys)
    }
    fn gettype(&self) -> KResult<VnodeType> {
        Err(Errno::Enosys)
    }
    fn isseekable(&self) -> bool {
        false
    }
    fn fsync(&self) -> KResult<()> {
        Ok(())
    }
    fn mmap(&self) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn truncate(&self, _len: u64) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn namefile(&self) -> KResult<String> {
        Err(Errno::Enosys)
    }
    fn creat(&self, _name: &str, _excl: bool) -> KResult<Arc<Vnode>> {
        Err(Errno::Enosys)
    }
    fn symlink(&self, _contents: &str, _name: &str) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn mkdir(&self, _name: &str) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn rmdir(&self, _name: &str) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn link(&self, _name: &str, _target: &Arc<Vnode>) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn remove(&self, _name: &str) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn rename(&self, _name: &str, _newdir: &Arc<Vnode>, _newname: &str) -> KResult<()> {
        Err(Errno::Enosys)
    }
    fn lookup(&self, _name: &str) -> KResult<Arc<Vnode>> {
        Err(Errno::Enosys)
    }
    fn lookparent(&self, _name: &str) -> KResult<Arc<Vnode>> {
        Err(Errno::Enosys)
    }
    fn readlink(&self, _buf: &mut [u8]) -> KResult<usize> {
        Err(Errno::Enosys)
    }
    fn getdirentry(&self, _uio: &mut Uio<'_>) -> KResult<usize> {
        Err(Errno::Enosys)
    }
}

/// A vnode: a reference-counted handle to whatever `ops` names, plus the
/// refcounting `spec.md` §4.6 requires ("a vnode is reclaimed when its
/// reference count drops to zero").
pub struct Vnode {
    ops: Arc<dyn VnodeOps>,
    refcount: AtomicU64,
}

impl Vnode {
    pub fn new(ops: Arc<dyn VnodeOps>) -> Arc<Self> {
        Arc::new(Self { ops, refcount: AtomicU64::new(1) })
    }

    pub fn ops(&self) -> &dyn VnodeOps {
        &*self.ops
    }

    /// Increments the reference count (`spec.md` §4.6 `VOP_INCREF`
    /// equivalent — handled here as a plain counter rather than a vop since
    /// every vnode implementation shares the same refcounting logic).
    pub fn incref(&self) {
        self.refcount.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the reference count, reclaiming the underlying object via
    /// `VOP_RECLAIM` when it reaches zero.
    ///
    /// # Errors
    ///
    /// Returns whatever [`VnodeOps::reclaim`] returns. `spec.md` §4.6: "if
    /// reclaim fails, it fails with EBUSY, in which case a warning is logged
    /// and the object persists" — a failed reclaim rolls the count back to
    /// what it was before this call, so the vnode is still considered held
    /// and a later decref can retry the reclaim.
    pub fn decref(&self) -> KResult<()> {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            if let Err(e) = self.ops.reclaim() {
                log::warn!("vnode reclaim failed ({e:?}), object persists");
                self.refcount.fetch_add(1, Ordering::AcqRel);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn refcount(&self) -> u64 {
        self.refcount.load(Ordering::Acquire)
    }
}
