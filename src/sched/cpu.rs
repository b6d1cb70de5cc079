//! The `Cpu` type (`spec.md` §3 "Cpu", §4.3 component 3 of §2).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::hal::{Hal, ShootdownDescriptor};
use crate::lock::{Lock, RawSpinlock};
use crate::param::MAX_SHOOTDOWN;

use super::ipi::IpiKind;
use super::thread::Thread;

/// One simulated CPU: a run queue, the thread currently running on it, a
/// zombie list awaiting reaping, a pending-IPI bitmap, and a bounded TLB
/// shootdown queue (`spec.md` §3 "Cpu" data model). Each field is its own
/// spinlock, matching `spec.md`'s "with its own spinlock" phrasing rather
/// than one lock over the whole struct, so e.g. enqueuing an IPI never
/// contends with a run-queue push.
pub struct Cpu {
    pub software_id: usize,
    pub hardware_id: u64,
    pub current_thread: Lock<RawSpinlock, Option<Arc<Thread>>>,
    pub run_queue: Lock<RawSpinlock, VecDeque<Arc<Thread>>>,
    pub zombies: Lock<RawSpinlock, Vec<Arc<Thread>>>,
    pending_ipi: Lock<RawSpinlock, IpiKind>,
    shootdown_queue: Lock<RawSpinlock, Vec<ShootdownDescriptor>>,
    /// Set when the shootdown queue overflowed past [`MAX_SHOOTDOWN`]: the
    /// next drain must invalidate the whole TLB rather than trust the queue
    /// (`spec.md` §4.3 "Shootdown queue overflow ⇒ full TLB flush instead of
    /// per-entry invalidation").
    shootdown_overflowed: AtomicBool,
    idle: AtomicBool,
    /// Set once this CPU has serviced an `OFFLINE` IPI (`spec.md` §4.3:
    /// "OFFLINE (leave the scheduler)"). An offline CPU is skipped by
    /// placement and migration but still services IPIs targeted at it
    /// directly.
    offline: AtomicBool,
}

impl Cpu {
    pub fn new(software_id: usize, hardware_id: u64) -> Self {
        Self {
            software_id,
            hardware_id,
            current_thread: Lock::new(RawSpinlock::new("cpu.current_thread"), None),
            run_queue: Lock::new(RawSpinlock::new("cpu.run_queue"), VecDeque::new()),
            zombies: Lock::new(RawSpinlock::new("cpu.zombies"), Vec::new()),
            pending_ipi: Lock::new(RawSpinlock::new("cpu.pending_ipi"), IpiKind::empty()),
            shootdown_queue: Lock::new(RawSpinlock::new("cpu.shootdown_queue"), Vec::new()),
            shootdown_overflowed: AtomicBool::new(false),
            idle: AtomicBool::new(true),
            offline: AtomicBool::new(false),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    pub(crate) fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::Release);
    }

    /// Whether this CPU has left the scheduler via an `OFFLINE` IPI
    /// (`spec.md` §4.3).
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    pub fn run_queue_len(&self) -> usize {
        self.run_queue.lock().len()
    }

    /// Queues `thread` for this CPU (`spec.md` §4.3 "Placement": round-robin
    /// or least-loaded target chosen by the caller; this just performs the
    /// enqueue once a target is picked).
    pub(crate) fn enqueue(&self, thread: Arc<Thread>) {
        thread.set_cpu_id(self.software_id);
        thread.mark_ready();
        self.run_queue.lock().push_back(thread);
    }

    pub(crate) fn dequeue(&self) -> Option<Arc<Thread>> {
        self.run_queue.lock().pop_front()
    }

    pub(crate) fn reap_zombie(&self, thread: &Arc<Thread>) {
        self.zombies.lock().push(Arc::clone(thread));
    }

    pub(crate) fn drain_zombies(&self) -> Vec<Arc<Thread>> {
        std::mem::take(&mut *self.zombies.lock())
    }

    /// Records a pending IPI of `kind` to be serviced next time this CPU
    /// checks (`spec.md` §4.3: "coalesce"). Safe to call from any context
    /// including another CPU's interrupt handler.
    pub(crate) fn request_ipi(&self, kind: IpiKind) {
        *self.pending_ipi.lock() |= kind;
    }

    pub(crate) fn queue_shootdown(&self, descriptor: ShootdownDescriptor) {
        self.request_ipi(IpiKind::TLBSHOOTDOWN);
        let mut queue = self.shootdown_queue.lock();
        if queue.len() >= MAX_SHOOTDOWN {
            self.shootdown_overflowed.store(true, Ordering::Release);
            queue.clear();
        } else {
            queue.push(descriptor);
        }
    }

    /// Drains and services every pending IPI on this CPU (`spec.md` §4.3:
    /// "a spinning CPU still services shootdowns" and the coalescing rule).
    /// Called from [`super::run_one`]'s idle branch and from
    /// [`super::thread_consider_migration`] — never from inside the spinlock
    /// spin loop itself, so [`crate::lock`] stays decoupled from
    /// [`super::Kernel`].
    pub fn service_pending_ipis(&self, hal: &dyn Hal) {
        let pending = std::mem::replace(&mut *self.pending_ipi.lock(), IpiKind::empty());
        if pending.is_empty() {
            return;
        }
        if pending.contains(IpiKind::TLBSHOOTDOWN) {
            if self.shootdown_overflowed.swap(false, Ordering::AcqRel) {
                log::debug!("cpu {}: shootdown queue overflowed, flushing whole TLB", self.software_id);
                hal.tlb_invalidate(ShootdownDescriptor { address_space: 0, vaddr: 0 });
            } else {
                for descriptor in std::mem::take(&mut *self.shootdown_queue.lock()) {
                    hal.tlb_invalidate(descriptor);
                }
            }
        }
        if pending.contains(IpiKind::UNIDLE) {
            log::trace!("cpu {}: servicing unidle ipi", self.software_id);
        }
        if pending.contains(IpiKind::OFFLINE) {
            log::info!("cpu {}: leaving the scheduler", self.software_id);
            self.offline.store(true, Ordering::Release);
        }
        if pending.contains(IpiKind::PANIC) {
            log::error!("cpu {}: halted by panic ipi", self.software_id);
            hal.cpu_halt();
        }
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("software_id", &self.software_id)
            .field("hardware_id", &self.hardware_id)
            .field("idle", &self.is_idle())
            .field("run_queue_len", &self.run_queue_len())
            .finish()
    }
}
