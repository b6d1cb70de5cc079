//! Threads and the scheduler (`spec.md` §4.3, component 3 of §2).
//!
//! Grounded in the teacher's `proc.rs`/`kernel.rs` split between a
//! process/thread table and a `Kernel` object tying CPUs together, but
//! restructured per `spec.md` §9's own redesign note ("Re-express as
//! explicit kernel-context fields passed to constructors instead of a
//! hidden global") into a [`Kernel`] that owns its [`Cpu`]s explicitly and
//! is passed to every scheduling call rather than reached through a
//! process-wide singleton — this also lets tests build as many independent
//! `Kernel`s as they like without interference.
//!
//! Each simulated [`Thread`] is backed 1:1 by a real OS thread
//! (`SPEC_FULL.md` §A): `thread_switch`/`thread_yield` realize suspension by
//! parking the calling OS thread and waking the target's, rather than a
//! real register-context switch, which is why [`crate::hal::Hal::context_switch`]
//! is only ever called as a bookkeeping hook around that park/wake.

mod cpu;
mod ipi;
mod thread;

pub use cpu::Cpu;
pub use ipi::IpiKind;
pub use thread::{Process, Thread, ThreadId, ThreadStack, ThreadState};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crate::hal::Hal;
use crate::lock::{assert_no_spinlocks_held, set_current_cpu};
use crate::param::{MIGRATION_IMBALANCE_THRESHOLD, NCPU};

/// Default kernel-thread stack size: must be a power of two
/// ([`ThreadStack::new`]).
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

std::thread_local! {
    /// The `Thread` the calling OS thread is currently standing in for,
    /// i.e. the analogue of OS/161's `curthread`. Set once, at the top of
    /// the closure passed to [`Kernel::thread_fork`]; never changes for the
    /// lifetime of the backing OS thread, since each `Thread` keeps its own
    /// OS thread for its whole life in this port.
    static CURRENT_THREAD: std::cell::RefCell<Option<Arc<Thread>>> = const { std::cell::RefCell::new(None) };
}

/// The `Thread` standing in for the calling OS thread, if any. `None` for
/// OS threads that were never forked through a [`Kernel`] (e.g. a test's own
/// main thread).
pub fn current_thread() -> Option<Arc<Thread>> {
    CURRENT_THREAD.with(|c| c.borrow().clone())
}

fn set_current_thread(thread: Option<Arc<Thread>>) {
    CURRENT_THREAD.with(|c| *c.borrow_mut() = thread);
}

std::thread_local! {
    /// The [`Kernel`] the calling OS thread was forked under. `spec.md` §9
    /// invites "a per-thread current-context accessor" in place of a hidden
    /// global `Kernel` singleton; this is that accessor, used by sleepable
    /// primitives in [`crate::sync`] whose [`crate::lock::RawLock`]
    /// implementation (`acquire`/`release`) has no way to take a `&Kernel`
    /// parameter directly.
    static CURRENT_KERNEL: std::cell::RefCell<Option<Arc<Kernel>>> = const { std::cell::RefCell::new(None) };
}

/// The [`Kernel`] the calling OS thread was forked under, if any.
pub fn current_kernel() -> Option<Arc<Kernel>> {
    CURRENT_KERNEL.with(|c| c.borrow().clone())
}

fn set_current_kernel(kernel: Option<Arc<Kernel>>) {
    CURRENT_KERNEL.with(|c| *c.borrow_mut() = kernel);
}

/// Owns every [`Cpu`] in the system (`spec.md` §3 "Kernel holds the CPU
/// list"). Constructed explicitly — never a global singleton — per
/// `spec.md` §9.
pub struct Kernel {
    cpus: Vec<Arc<Cpu>>,
    hal: &'static dyn Hal,
    next_placement: AtomicUsize,
}

impl Kernel {
    /// Builds a kernel with `ncpu` CPUs (must be `1..=NCPU`) wired to the
    /// given [`Hal`].
    pub fn new(ncpu: usize, hal: &'static dyn Hal) -> Self {
        assert!(ncpu >= 1 && ncpu <= NCPU, "ncpu must be in 1..={NCPU}, got {ncpu}");
        let cpus = (0..ncpu).map(|id| Arc::new(Cpu::new(id, id as u64))).collect();
        Self { cpus, hal, next_placement: AtomicUsize::new(0) }
    }

    /// Convenience constructor against [`crate::hal::global`].
    pub fn with_native_hal(ncpu: usize) -> Self {
        Self::new(ncpu, crate::hal::global())
    }

    pub fn ncpu(&self) -> usize {
        self.cpus.len()
    }

    pub fn cpu(&self, id: usize) -> &Arc<Cpu> {
        &self.cpus[id]
    }

    pub fn hal(&self) -> &'static dyn Hal {
        self.hal
    }

    /// Picks a target CPU for a freshly forked thread. `spec.md` §4.3
    /// "Placement": least-loaded, breaking ties round-robin.
    fn choose_placement_target(&self) -> usize {
        let (min_idx, _) = self
            .cpus
            .iter()
            .enumerate()
            .filter(|(_, cpu)| !cpu.is_offline())
            .min_by_key(|(_, cpu)| cpu.run_queue_len())
            .expect("kernel always has at least one online cpu");
        let _ = self.next_placement.fetch_add(1, Ordering::Relaxed);
        min_idx
    }

    /// Creates a new thread running `body` and places it on a CPU's run
    /// queue (`spec.md` §4.3 "Creation"). The thread does not actually begin
    /// running until something calls [`thread_switch`] or [`thread_yield`]
    /// on its target CPU and the scheduler picks it.
    pub fn thread_fork<F>(self: &Arc<Self>, name: impl Into<String>, process: Weak<Process>, body: F) -> Arc<Thread>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = Arc::new(Thread::new(name, process, DEFAULT_STACK_SIZE));
        let target = self.choose_placement_target();
        self.cpus[target].enqueue(Arc::clone(&thread));

        let kernel = Arc::clone(self);
        let thread_for_runner = Arc::clone(&thread);
        std::thread::Builder::new()
            .name(thread_for_runner.name.clone())
            .spawn(move || {
                thread_for_runner.park_until_run();
                set_current_cpu(thread_for_runner.cpu_id().expect("running thread has a cpu"));
                set_current_thread(Some(Arc::clone(&thread_for_runner)));
                set_current_kernel(Some(Arc::clone(&kernel)));
                body();
                kernel.thread_exit(&thread_for_runner);
            })
            .expect("failed to spawn backing OS thread for kernel thread");

        thread
    }

    /// Picks the next ready thread for `cpu_id`, if any, without touching
    /// `current_thread` (used by [`thread_switch`]/[`thread_yield`] after
    /// they have already decided the current thread should yield).
    fn pick_next(&self, cpu_id: usize) -> Option<Arc<Thread>> {
        self.cpus[cpu_id].dequeue()
    }

    /// Voluntarily yields the CPU the calling kernel thread is running on:
    /// the current thread goes back on the run queue (`Ready`), the next
    /// ready thread (if any) is resumed, and the caller blocks until it is
    /// itself resumed again (`spec.md` §4.3 "Voluntary switch").
    ///
    /// `current` must be the thread actually running on the calling OS
    /// thread.
    pub fn thread_yield(&self, current: &Arc<Thread>) {
        self.thread_switch(current, ThreadState::Ready);
    }

    /// Terminates the calling kernel thread: it is marked `Zombie` and
    /// handed to its CPU's zombie list for later reaping rather than
    /// rescheduled (`spec.md` §4.3 "Termination"). The backing OS thread
    /// returns from its closure immediately afterward.
    pub fn thread_exit(&self, current: &Arc<Thread>) {
        self.thread_switch(current, ThreadState::Zombie);
    }

    /// Puts `current` to sleep and switches away. Called only by
    /// [`crate::sync::WaitChannel::sleep`], which has already recorded
    /// `current` as a waiter on itself before calling this — `spec.md` §4.4
    /// requires the enqueue-then-release-then-switch sequence to be
    /// indivisible from the point of view of a concurrent wakeup.
    pub(crate) fn thread_sleep(&self, current: &Arc<Thread>) {
        self.thread_switch(current, ThreadState::Sleep);
    }

    /// Moves a sleeping thread back onto its CPU's run queue. Called only by
    /// [`crate::sync::WaitChannel::wake_one`]/`wake_all`.
    pub(crate) fn thread_wake(&self, thread: &Arc<Thread>) {
        let cpu_id = thread.cpu_id().expect("thread_wake: sleeping thread has no cpu");
        self.cpus[cpu_id].enqueue(Arc::clone(thread));
    }

    /// Common core of [`thread_yield`]/[`thread_exit`]: puts `current` into
    /// `next_state`, resumes the next ready thread on the same CPU (if any,
    /// else the CPU goes idle), and — unless `current` is exiting — blocks
    /// until `current` is resumed.
    fn thread_switch(&self, current: &Arc<Thread>, next_state: ThreadState) {
        let cpu_id = current.cpu_id().expect("thread_switch: current thread has no cpu");
        assert_no_spinlocks_held("thread_switch");

        match next_state {
            ThreadState::Zombie => {
                current.mark_zombie();
                self.cpus[cpu_id].reap_zombie(current);
            }
            ThreadState::Ready => {
                current.mark_ready();
                self.cpus[cpu_id].enqueue(Arc::clone(current));
            }
            ThreadState::Sleep => {
                // The run-queue placement is intentionally skipped: whoever
                // called this (a `WaitChannel`) has already recorded
                // `current` on its own waiter list and is responsible for
                // calling `thread_wake` to put it back on a run queue.
                current.mark_sleep();
            }
            ThreadState::Run => unreachable!("thread_switch only transitions to Ready, Sleep or Zombie"),
        }

        self.hal.context_switch(0, 0);

        match self.pick_next(cpu_id) {
            Some(next) => {
                self.cpus[cpu_id].set_idle(false);
                *self.cpus[cpu_id].current_thread.lock() = Some(Arc::clone(&next));
                next.mark_run();
            }
            None => {
                self.cpus[cpu_id].set_idle(true);
                *self.cpus[cpu_id].current_thread.lock() = None;
            }
        }

        if next_state != ThreadState::Zombie {
            current.park_until_run();
        }
    }

    /// Runs one scheduling step for `cpu_id` from an idle context: services
    /// any pending IPIs, and if the run queue is non-empty, resumes its
    /// head. Intended for a CPU's idle loop (`spec.md` §4.3 "A CPU with an
    /// empty run queue idles... but still services IPIs").
    pub fn run_one(&self, cpu_id: usize) {
        let cpu = &self.cpus[cpu_id];
        cpu.service_pending_ipis(self.hal);
        if let Some(next) = self.pick_next(cpu_id) {
            cpu.set_idle(false);
            *cpu.current_thread.lock() = Some(Arc::clone(&next));
            next.mark_run();
        } else {
            cpu.set_idle(true);
            *cpu.current_thread.lock() = None;
            self.hal.cpu_idle();
        }
    }

    /// Rebalances run queues across CPUs (`spec.md` §4.3 "Load balancing"):
    /// if the busiest and idlest CPU's queue lengths differ by more than
    /// [`MIGRATION_IMBALANCE_THRESHOLD`], moves one thread from the busiest
    /// to the idlest. Also services pending IPIs on the calling CPU, since
    /// this is the other call site (besides the idle loop) where a CPU
    /// checks in with the scheduler.
    pub fn thread_consider_migration(&self, cpu_id: usize) {
        self.cpus[cpu_id].service_pending_ipis(self.hal);

        let online = || self.cpus.iter().filter(|c| !c.is_offline());
        let Some(busiest) = online().max_by_key(|c| c.run_queue_len()) else { return };
        let Some(idlest) = online().min_by_key(|c| c.run_queue_len()) else { return };
        if busiest.software_id == idlest.software_id {
            return;
        }
        let imbalance = busiest.run_queue_len().saturating_sub(idlest.run_queue_len());
        if imbalance > MIGRATION_IMBALANCE_THRESHOLD {
            if let Some(migrant) = busiest.dequeue() {
                log::debug!(
                    "migrating thread {:?} from cpu {} to cpu {}",
                    migrant.id,
                    busiest.software_id,
                    idlest.software_id
                );
                idlest.enqueue(migrant);
                self.ipi_send(idlest.software_id, IpiKind::UNIDLE);
            }
        }
    }

    /// Sends an IPI to one CPU (`spec.md` §4.3 "IPIs").
    pub fn ipi_send(&self, cpu_id: usize, kind: IpiKind) {
        let cpu = &self.cpus[cpu_id];
        cpu.request_ipi(kind);
        self.hal.mainbus_send_ipi(cpu.hardware_id as usize);
    }

    /// Sends an IPI to every CPU but the caller's.
    pub fn ipi_broadcast(&self, from_cpu_id: usize, kind: IpiKind) {
        for cpu in &self.cpus {
            if cpu.software_id != from_cpu_id {
                self.ipi_send(cpu.software_id, kind);
            }
        }
    }
}
