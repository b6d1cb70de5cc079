//! Machine-independent kernel runtime core for a teaching operating system.
//!
//! Five layered components (leaves first), mirroring the layering of the
//! original kernel: [`spl`] (interrupt priority level), [`lock`] (spinlocks),
//! [`sched`] (threads and scheduler), [`sync`] (sleep primitives layered on
//! wait channels), and [`vfs`] (the virtual filesystem layer). [`trap`] glues
//! the machine-dependent entry point to the scheduler and VFS, dispatching
//! to the table [`syscall`] registers. [`hal`] is the narrow interface to
//! everything machine-dependent (assembly context switches, MMU/TLB, device
//! interrupts) that a real port would implement in terms of actual
//! hardware; here [`hal::NativeHal`] implements it on the host OS so the
//! rest of the crate is directly testable.

pub mod errno;
pub mod hal;
pub mod lock;
pub mod param;
pub mod sched;
pub mod spl;
pub mod sync;
pub mod syscall;
pub mod trap;
pub mod vfs;

pub use errno::{Errno, KResult};
