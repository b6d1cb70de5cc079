//! Wait channels (`spec.md` §4.4, the foundation every sleep primitive in
//! this module is built on).
//!
//! Grounded in the teacher's `lock/sleepablelock.rs` `reacquire_after`
//! pattern for the atomic release/sleep/reacquire sequence, generalized
//! here into a standalone FIFO queue of waiting threads rather than a
//! single sleepable lock, since `spec.md` §4.4 wants the same channel usable
//! underneath semaphores, mutexes and condition variables.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::lock::{Lock, RawLock, RawSpinlock};
use crate::sched::{Kernel, Thread};

/// A FIFO queue of threads blocked waiting for some condition. Does not
/// itself know what the condition is — callers pair a `WaitChannel` with
/// whatever lock protects the condition, exactly as OS/161's `wchan` is
/// always used alongside a spinlock.
pub struct WaitChannel {
    name: &'static str,
    waiters: Lock<RawSpinlock, VecDeque<Arc<Thread>>>,
}

impl WaitChannel {
    pub const fn new(name: &'static str) -> Self {
        Self { name, waiters: Lock::new(RawSpinlock::new("wchan.waiters"), VecDeque::new()) }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Number of threads currently asleep on this channel.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Atomically: records `thread` as a waiter on this channel, releases
    /// `guard`, and switches away. When `thread` is next woken and
    /// scheduled, reacquires `guard` and returns it (`spec.md` §4.4: "sleep
    /// must release the caller-supplied lock and enqueue atomically with
    /// respect to a concurrent wakeup").
    ///
    /// The atomicity comes from pushing onto `self.waiters` — itself
    /// spinlock-protected — before releasing the caller's lock: a
    /// concurrent `wake_one`/`wake_all` either observes `thread` already
    /// queued (and wakes it) or hasn't run yet (and will, once it takes
    /// `self.waiters`'s lock after this push).
    pub fn sleep<'g, R: RawLock, T>(
        &self,
        kernel: &Kernel,
        thread: &Arc<Thread>,
        guard: crate::lock::Guard<'g, R, T>,
    ) -> crate::lock::Guard<'g, R, T> {
        thread.set_waitchannel_name(Some(self.name));
        self.waiters.lock().push_back(Arc::clone(thread));

        // SAFETY: `guard` is not touched again until `released.reacquire()`
        // below turns it back into a live guard.
        let released = unsafe { guard.release_for_sleep() };
        kernel.thread_sleep(thread);
        thread.set_waitchannel_name(None);
        released.reacquire()
    }

    /// Wakes the longest-waiting thread on this channel, if any (`spec.md`
    /// §4.4 "FIFO wakeup order").
    pub fn wake_one(&self, kernel: &Kernel) {
        if let Some(thread) = self.waiters.lock().pop_front() {
            kernel.thread_wake(&thread);
        }
    }

    /// Wakes every thread currently on this channel.
    pub fn wake_all(&self, kernel: &Kernel) {
        let waiters: Vec<_> = self.waiters.lock().drain(..).collect();
        for thread in waiters {
            kernel.thread_wake(&thread);
        }
    }
}
