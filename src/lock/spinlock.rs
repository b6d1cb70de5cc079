//! Spinlocks (`spec.md` §4.2, component 2 of §2).
//!
//! Grounded directly in the teacher's `lock/spinlock.rs`: the holder is
//! recorded as an atomic identifier (there: an `AtomicPtr<Cpu>`; here: an
//! `AtomicU64` holder token, 0 meaning free), acquired with a
//! compare-and-swap spin loop and released with a plain atomic store using
//! `Acquire`/`Release` ordering so that stores in one critical section are
//! visible to loads in the next.
//!
//! A thread scheduled onto a CPU (via [`set_current_cpu`]) is identified by
//! that CPU. A thread that never went through the scheduler (e.g. a test's
//! own OS thread calling a lock directly) gets no CPU — but it still needs a
//! holder identity distinct from both `FREE` and every other such thread, or
//! two of them racing on the same lock would see a trivial zero-to-zero CAS
//! "succeed" with no actual exclusion, and a real holder's `release` would
//! find itself unable to prove it holds a lock it does hold. [`holder_token`]
//! covers both: CPU-backed threads and CPU-less threads draw from disjoint,
//! always-nonzero numeric ranges (even vs. odd), so `FREE` (0) never
//! collides with either.

use std::hint::spin_loop;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::RawLock;
use crate::hal;
use crate::spl::{self, IplLevel};

const FREE: u64 = 0;

std::thread_local! {
    /// The CPU this thread is currently scheduled on, set by
    /// [`crate::sched`] when a thread begins running. `None` for a thread
    /// that has never been assigned a CPU (e.g. the test harness's own main
    /// thread, before it ever touches the scheduler) — such a thread is
    /// still a valid spinlock holder, it is just not attributable to a
    /// specific `Cpu` for diagnostics (see [`holder_token`] for how it still
    /// gets a usable identity).
    static CURRENT_CPU: std::cell::Cell<Option<usize>> = const { std::cell::Cell::new(None) };
    /// Lazily-assigned identity for a thread with no assigned CPU, drawn
    /// from [`NEXT_FALLBACK_TOKEN`] the first time it is needed and cached
    /// for the life of the OS thread.
    static FALLBACK_TOKEN: std::cell::Cell<Option<u64>> = const { std::cell::Cell::new(None) };
    /// `spec.md` §4.2: "the CPU's held-spinlock counter is incremented while
    /// held". Tracked per-thread since each simulated CPU is backed 1:1 by
    /// the OS thread currently running on it.
    static HELD_SPINLOCKS: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
    static SAVED_SPL: std::cell::RefCell<Vec<IplLevel>> = const { std::cell::RefCell::new(Vec::new()) };
}

static NEXT_FALLBACK_TOKEN: AtomicUsize = AtomicUsize::new(1);

/// Called by [`crate::sched`] whenever a thread begins running on CPU `id`.
pub fn set_current_cpu(id: usize) {
    CURRENT_CPU.with(|c| c.set(Some(id)));
}

/// The CPU the calling thread is currently scheduled on, if any.
pub fn current_cpu() -> Option<usize> {
    CURRENT_CPU.with(|c| c.get())
}

/// A nonzero identity for the calling thread usable as a spinlock holder
/// token, whether or not it has an assigned CPU. CPU-backed threads map to
/// `(id + 1) * 2` (even); CPU-less threads map to `id * 2 + 1` (odd, `id`
/// assigned once per OS thread from [`NEXT_FALLBACK_TOKEN`]). The two
/// ranges never overlap, and neither ever produces `FREE` (0).
fn holder_token() -> u64 {
    if let Some(cpu) = current_cpu() {
        (cpu as u64 + 1) * 2
    } else {
        FALLBACK_TOKEN.with(|c| {
            if let Some(token) = c.get() {
                token
            } else {
                let id = NEXT_FALLBACK_TOKEN.fetch_add(1, Ordering::Relaxed) as u64;
                let token = id * 2 + 1;
                c.set(Some(token));
                token
            }
        })
    }
}

/// Number of spinlocks the calling thread currently holds (`spec.md` §8
/// invariant: "`L.holder` ≠ null ⇒ `L.holder.held_spinlocks_count` ≥ 1", and
/// §5 "Suspension is forbidden while holding any spinlock").
pub fn held_spinlocks() -> u32 {
    HELD_SPINLOCKS.with(std::cell::Cell::get)
}

/// Asserts the calling thread holds no spinlocks. `spec.md` §4.2: "Fails
/// fatally on:... any attempt to sleep while any spinlock is held on this
/// CPU."
pub fn assert_no_spinlocks_held(what: &str) {
    assert_eq!(
        held_spinlocks(),
        0,
        "{what}: cannot suspend while holding {} spinlock(s)",
        held_spinlocks()
    );
}

/// Mutual exclusion lock that busy-waits (spins). See [`super::Lock`] for the
/// generic guard/data wrapper this plugs into as `RawSpinlock::Lock<T>`.
pub struct RawSpinlock {
    name: &'static str,
    /// [`holder_token`] of the holder, or `FREE` (0).
    locked: AtomicU64,
}

/// A spinlock protecting `T`.
pub type Spinlock<T> = super::Lock<RawSpinlock, T>;
/// Guard of a [`Spinlock<T>`].
pub type SpinlockGuard<'s, T> = super::Guard<'s, RawSpinlock, T>;

impl RawSpinlock {
    pub const fn new(name: &'static str) -> Self {
        Self { name, locked: AtomicU64::new(FREE) }
    }
}

impl RawLock for RawSpinlock {
    /// `spec.md` §4.2: "raises IPL to HIGH, then busy-waits on an atomic
    /// test-and-set of the lock word while periodically checking pending
    /// IPIs (so a spinning CPU still services shootdowns)."
    fn acquire(&self) {
        let old = spl::splhigh(hal::global());
        SAVED_SPL.with(|s| s.borrow_mut().push(old));

        assert!(!self.holding(), "acquire: {} already held by this cpu (would re-acquire)", self.name);

        let me = holder_token();
        // `spec.md` §4.2: "busy-waits... while periodically checking pending
        // IPIs (so a spinning CPU still services shootdowns)". This port
        // keeps locks decoupled from the `Kernel`/`Cpu` registry (so locks
        // can be used without a running scheduler at all), so IPI servicing
        // while spinning is the scheduler's responsibility: `Cpu::run_one`'s
        // idle path and `thread_consider_migration` both call
        // `Cpu::service_pending_ipis` directly instead of this loop reaching
        // back out to the `Kernel`.
        while self
            .locked
            .compare_exchange_weak(FREE, me, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spin_loop();
        }
        HELD_SPINLOCKS.with(|c| c.set(c.get() + 1));
    }

    /// `spec.md` §4.2: asserts this CPU is the holder, decrements the
    /// held-spinlock counter, clears the holder, releases the word, then
    /// lowers IPL.
    fn release(&self) {
        assert!(self.holding(), "release: {} not held by this cpu", self.name);
        self.locked.store(FREE, Ordering::Release);
        HELD_SPINLOCKS.with(|c| c.set(c.get().saturating_sub(1)));
        let old = SAVED_SPL
            .with(|s| s.borrow_mut().pop())
            .expect("release: spl stack underflow (unbalanced acquire/release)");
        spl::splx(hal::global(), old);
    }

    fn holding(&self) -> bool {
        self.locked.load(Ordering::Relaxed) == holder_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::Lock;

    #[test]
    fn acquire_release_restores_prior_spl_and_holder() {
        set_current_cpu(0);
        let lk: Spinlock<i32> = Lock::new(RawSpinlock::new("test"), 0);
        assert!(!lk.do_i_hold());
        {
            let mut g = lk.lock();
            *g += 1;
            assert!(lk.do_i_hold());
        }
        assert!(!lk.do_i_hold());
        assert_eq!(held_spinlocks(), 0);
    }

    /// A thread that never ran through `set_current_cpu` (every test
    /// function's own OS thread, and any `#[test]` exercising a `Lock` type
    /// directly without going through `Kernel::thread_fork`) must still get
    /// a working holder identity: acquiring and releasing must not panic,
    /// and a concurrent CPU-less acquirer on another OS thread must be
    /// genuinely excluded rather than sharing the same trivial identity.
    #[test]
    fn acquire_release_works_without_an_assigned_cpu() {
        let lk: Spinlock<i32> = Lock::new(RawSpinlock::new("no-cpu"), 0);
        assert!(!lk.do_i_hold());
        {
            let mut g = lk.lock();
            *g += 1;
            assert!(lk.do_i_hold());
        }
        assert!(!lk.do_i_hold());
        assert_eq!(held_spinlocks(), 0);
    }

    #[test]
    fn cpu_less_threads_get_distinct_holder_tokens_and_real_exclusion() {
        let lk = std::sync::Arc::new(Lock::new(RawSpinlock::new("contended"), 0_i32));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lk = std::sync::Arc::clone(&lk);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    let mut g = lk.lock();
                    *g += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lk.lock(), 8000);
    }

    #[test]
    #[should_panic(expected = "already held by this cpu")]
    fn reacquire_by_same_cpu_is_fatal() {
        set_current_cpu(1);
        let lk: Spinlock<i32> = Lock::new(RawSpinlock::new("reentrant"), 0);
        lk.raw.acquire();
        lk.raw.acquire();
    }

    #[test]
    #[should_panic(expected = "not held by this cpu")]
    fn release_by_non_holder_is_fatal() {
        set_current_cpu(2);
        let lk: Spinlock<i32> = Lock::new(RawSpinlock::new("unowned"), 0);
        lk.raw.release();
    }
}
