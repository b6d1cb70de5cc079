//! The syscall numbering surface (`spec.md` §6 "numbered entry points").
//!
//! Deliberately thin: user programs and libc are external collaborators
//! (`spec.md` §1), so this crate only needs enough of a syscall table to
//! exercise [`crate::trap::TrapDispatcher`] end-to-end, not a full libc ABI.

use crate::errno::{Errno, KResult};
use crate::trap::TrapDispatcher;

/// Syscall numbers this crate knows about out of the box. A real port would
/// have dozens; these are the ones `spec.md`'s example scenarios exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    Write = 1,
    Read = 2,
    Sync = 3,
}

/// Registers the default syscall table onto `dispatcher`. `write`/`read`
/// are stubbed as unsupported ([`Errno::Enosys`]) since routing them to a
/// real per-process file descriptor table requires process state this
/// crate scopes out; `sync` is wired because it only needs a [`Vfs`] and is
/// exercised by `spec.md` §8's end-to-end scenarios.
///
/// [`Vfs`]: crate::vfs::Vfs
pub fn register_default_syscalls(dispatcher: &TrapDispatcher, vfs: std::sync::Arc<crate::vfs::Vfs>) {
    dispatcher.register_syscall(Syscall::Write as u32, |_args| -> KResult<i64> { Err(Errno::Enosys) });
    dispatcher.register_syscall(Syscall::Read as u32, |_args| -> KResult<i64> { Err(Errno::Enosys) });
    dispatcher.register_syscall(Syscall::Sync as u32, move |_args| -> KResult<i64> {
        vfs.sync()?;
        Ok(0)
    });
}
