//! Condition variables (`spec.md` §4.4).
//!
//! Always used together with a [`crate::sync::kmutex::KMutex`], exactly
//! like the teacher's `sync::Condvar` pairs with a `SleepablelockGuard`.

use std::sync::Arc;

use crate::sched::{Kernel, Thread};

use super::kmutex::KMutexGuard;
use super::wait_channel::WaitChannel;

pub struct CondVar {
    wc: WaitChannel,
}

impl CondVar {
    pub const fn new(name: &'static str) -> Self {
        Self { wc: WaitChannel::new(name) }
    }

    /// Atomically unlocks `guard`'s mutex and sleeps; relocks it before
    /// returning (`spec.md` §4.4 "CV wait/signal/broadcast").
    pub fn wait<'g, T>(&self, kernel: &Kernel, thread: &Arc<Thread>, guard: KMutexGuard<'g, T>) -> KMutexGuard<'g, T> {
        self.wc.sleep(kernel, thread, guard)
    }

    /// Wakes one waiter, if any (`spec.md` §8 scenario "CV broadcast" also
    /// exercises [`CondVar::broadcast`]).
    pub fn signal(&self, kernel: &Kernel) {
        self.wc.wake_one(kernel);
    }

    /// Wakes every waiter.
    pub fn broadcast(&self, kernel: &Kernel) {
        self.wc.wake_all(kernel);
    }
}
