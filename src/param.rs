//! Compile-time kernel configuration.
//!
//! The teaching kernel has no runtime configuration surface (no config file,
//! no env vars); the set of tunables below *is* its configuration layer, the
//! same role `kernel-rs/src/param.rs` plays in the teacher.

/// Maximum number of CPUs a [`crate::sched::Kernel`] can be built with.
pub const NCPU: usize = 8;

/// Maximum length of a thread name, including the NUL terminator budget (not
/// enforced on the `String`-backed host port, kept as a documented ceiling
/// for parity with the source kernel's fixed-size name buffers).
pub const MAXTHREADNAME: usize = 32;

/// Maximum length of a single path component (`spec.md` §4.6: "capped at
/// NAME_MAX+1").
pub const NAME_MAX: usize = 255;

/// Maximum length of a full path string accepted by [`crate::vfs`] lookups.
pub const MAXPATH: usize = 1024;

/// Capacity of a CPU's TLB-shootdown queue (`spec.md` §3 CPU, §8 "Boundary
/// behaviors"). One more than this triggers a full flush.
pub const MAX_SHOOTDOWN: usize = 16;

/// `thread_consider_migration` (`spec.md` §4.3) moves a thread from the most
/// loaded CPU to the least loaded one only when the run-queue length
/// difference exceeds this. Not specified numerically in spec.md; fixed here
/// and recorded as an Open Question resolution in DESIGN.md.
pub const MIGRATION_IMBALANCE_THRESHOLD: usize = 2;

/// Dense error code count (`spec.md` §6: "64 codes").
pub const NUM_ERRNO: usize = 64;
