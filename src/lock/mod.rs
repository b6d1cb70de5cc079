//! Generic lock scaffolding shared by every lock flavor in this crate.
//!
//! Grounded in the teacher's `lock/mod.rs`: rather than giving spinlocks,
//! sleep-locks and sleepable-locks independent implementations, the teacher
//! factors the common "holds a raw mutual-exclusion primitive plus the data
//! it protects" shape into one generic `Lock<R, T>` / `Guard<'_, R, T>` pair
//! parameterized over a `RawLock` trait object describing only how to
//! acquire/release/query the raw primitive. We keep that shape; `spec.md`'s
//! spinlock (§4.2) and the sleepable mutex the sleep primitives in
//! [`crate::sync`] are built on both implement [`RawLock`].

use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

mod spinlock;

pub use spinlock::{
    assert_no_spinlocks_held, current_cpu, held_spinlocks, set_current_cpu, RawSpinlock,
    Spinlock, SpinlockGuard,
};

/// Behavior common to every raw mutual-exclusion primitive usable as the `R`
/// parameter of [`Lock`].
pub trait RawLock {
    fn acquire(&self);
    fn release(&self);
    /// Whether the calling thread currently holds this lock.
    fn holding(&self) -> bool;
}

/// A lock that owns both a raw primitive `R` and the data `T` it protects.
pub struct Lock<R, T> {
    pub(crate) raw: R,
    data: UnsafeCell<T>,
}

// SAFETY: `R: RawLock` guarantees mutual exclusion on `data`; the only way to
// reach `data` is through a `Guard` produced by `Lock::lock`, which requires
// holding `raw`.
unsafe impl<R: RawLock + Send, T: Send> Sync for Lock<R, T> {}

impl<R: RawLock, T> Lock<R, T> {
    pub const fn new(raw: R, data: T) -> Self {
        Self { raw, data: UnsafeCell::new(data) }
    }

    /// Acquires the lock, blocking (by whatever means `R` implements) until
    /// it is held, and returns a scope guard.
    pub fn lock(&self) -> Guard<'_, R, T> {
        self.raw.acquire();
        Guard { lock: self }
    }

    /// Whether the calling thread holds this lock (`spec.md` §4.2
    /// `do_i_hold`).
    pub fn do_i_hold(&self) -> bool {
        self.raw.holding()
    }

    /// Raw pointer to the protected data, valid as long as `self` lives.
    /// Callers must ensure mutual exclusion themselves (used internally by
    /// [`Guard`]).
    fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

/// RAII guard returned by [`Lock::lock`]. Releases the raw primitive on drop.
pub struct Guard<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
}

impl<R: RawLock, T> Deref for Guard<'_, R, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies holding `self.lock.raw`.
        unsafe { &*self.lock.data_ptr() }
    }
}

impl<R: RawLock, T> DerefMut for Guard<'_, R, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard implies holding `self.lock.raw`.
        unsafe { &mut *self.lock.data_ptr() }
    }
}

impl<R: RawLock, T> Drop for Guard<'_, R, T> {
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

impl<'s, R: RawLock, T> Guard<'s, R, T> {
    /// Releases the inner raw lock early and hands back a token that can
    /// reacquire it. Used by [`crate::sync::WaitChannel::sleep`] to
    /// implement "atomically release, sleep, reacquire" without the caller
    /// juggling the release/reacquire themselves — the direct analogue of
    /// the teacher's `Waitable::raw_release`/`raw_acquire` pair wired
    /// through `Guard::reacquire_after`.
    ///
    /// Takes `self` by value and suppresses its `Drop` (via
    /// [`std::mem::forget`]) after manually releasing the raw lock, so the
    /// original guard can never also run its destructor and release a
    /// second time once [`Released::reacquire`] hands back a live guard.
    ///
    /// # Safety
    ///
    /// The raw lock must not be accessed through any other guard while the
    /// returned [`Released`] token is alive and has not yet been turned back
    /// into a `Guard`.
    pub(crate) unsafe fn release_for_sleep(self) -> Released<'s, R, T> {
        self.lock.raw.release();
        let lock = self.lock;
        std::mem::forget(self);
        Released { lock }
    }
}

/// Token representing a [`Guard`] whose raw lock has been temporarily
/// released. Reacquiring turns it back into a live guard. Only constructed
/// by [`Guard::release_for_sleep`].
pub(crate) struct Released<'s, R: RawLock, T> {
    lock: &'s Lock<R, T>,
}

impl<'s, R: RawLock, T> Released<'s, R, T> {
    pub(crate) fn reacquire(self) -> Guard<'s, R, T> {
        self.lock.raw.acquire();
        Guard { lock: self.lock }
    }
}
