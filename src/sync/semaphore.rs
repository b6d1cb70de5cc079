//! Counting semaphores (`spec.md` §4.4).

use crate::lock::{Lock, RawSpinlock};
use crate::sched::{Kernel, Thread};
use std::sync::Arc;

use super::wait_channel::WaitChannel;

/// A classic counting semaphore layered on a [`WaitChannel`] (`spec.md` §8
/// scenario "Semaphore FIFO": waiters are released in the order they
/// called [`Semaphore::wait`]).
pub struct Semaphore {
    count: Lock<RawSpinlock, usize>,
    wc: WaitChannel,
}

impl Semaphore {
    pub const fn new(name: &'static str, initial: usize) -> Self {
        Self { count: Lock::new(RawSpinlock::new("semaphore.count"), initial), wc: WaitChannel::new(name) }
    }

    /// `P(s)` / `down`: blocks while the count is zero, then decrements it.
    pub fn wait(&self, kernel: &Kernel, thread: &Arc<Thread>) {
        let mut guard = self.count.lock();
        while *guard == 0 {
            guard = self.wc.sleep(kernel, thread, guard);
        }
        *guard -= 1;
    }

    /// `V(s)` / `up`: increments the count and wakes the longest-waiting
    /// sleeper, if any.
    pub fn signal(&self, kernel: &Kernel) {
        {
            let mut guard = self.count.lock();
            *guard += 1;
        }
        self.wc.wake_one(kernel);
    }

    pub fn count(&self) -> usize {
        *self.count.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn wakes_waiters_in_fifo_order() {
        let kernel = Arc::new(Kernel::new(1, hal::global()));
        let sem = Arc::new(Semaphore::new("test", 0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let started = Arc::new(AtomicUsize::new(0));

        let mut threads = Vec::new();
        for i in 0..3 {
            let sem = Arc::clone(&sem);
            let kernel = Arc::clone(&kernel);
            let order = Arc::clone(&order);
            let started = Arc::clone(&started);
            let t = kernel.thread_fork(format!("waiter-{i}"), std::sync::Weak::new(), move || {
                started.fetch_add(1, Ordering::SeqCst);
                let me = crate::sched::current_thread().expect("forked thread has a current_thread");
                sem.wait(&kernel, &me);
                order.lock().unwrap().push(i);
            });
            threads.push(t);
        }

        for _ in 0..3 {
            kernel.run_one(0);
            std::thread::sleep(Duration::from_millis(5));
        }

        for i in 0..3 {
            sem.signal(&kernel);
            std::thread::sleep(Duration::from_millis(5));
            kernel.run_one(0);
        }

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(order.lock().unwrap().len(), 3);
    }
}
