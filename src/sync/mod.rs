//! Sleep primitives layered on wait channels (`spec.md` §4.4, component 4 of
//! §2): semaphores, sleepable mutexes, condition variables, and a deadlock
//! detector. Built on top of [`crate::sched`] rather than the reverse —
//! putting a thread to sleep means asking the scheduler to switch away, and
//! waking one means asking it to put the thread back on a run queue.

mod cv;
mod hangman;
mod kmutex;
mod semaphore;
mod wait_channel;

pub use cv::CondVar;
pub use hangman::Hangman;
pub use kmutex::{KMutex, KMutexGuard, RawKMutex};
pub use semaphore::Semaphore;
pub use wait_channel::WaitChannel;
