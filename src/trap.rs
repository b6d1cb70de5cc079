//! Trap, interrupt and syscall dispatch (`spec.md` §4.5, component 6 of
//! §2). The single entry point the machine-dependent trap handler calls
//! into once it has saved registers and built a [`TrapFrame`].
//!
//! Grounded in the teacher's `trap.rs` dispatch on `scause`, generalized
//! into a table-driven dispatcher (device IRQ handlers and syscalls are
//! both just registries of callbacks here) since this crate has no fixed
//! device set or syscall numbering of its own to hardcode.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use crate::errno::{Errno, KResult};
use crate::hal::{Hal, VmFaultKind};
use crate::lock::{Lock, RawSpinlock};
use crate::sched::Thread;
use crate::spl;

/// A signal kind a user-mode fatal fault is translated to before the
/// faulting process is terminated (`spec.md` §4.5 step 6: "translates the
/// hardware code to a signal kind (SEGV/BUS/ILL/TRAP/FPE)"; `spec.md` §7:
/// "no signal delivery machinery is required" — this crate only needs to
/// name which signal killed the process, not actually deliver one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Invalid memory reference (unmapped or protection-violating access).
    Segv,
    /// Bus error (misaligned or otherwise invalid memory access).
    Bus,
    /// Illegal instruction.
    Ill,
    /// Trace/breakpoint trap.
    Trap,
    /// Floating-point exception.
    Fpe,
}

impl Signal {
    /// Translates a VM-fault hardware code to a signal kind (`spec.md`
    /// §4.5 step 6). Every [`VmFaultKind`] this crate models is a bad
    /// memory reference, so all of them map to `SEGV`; `BUS`/`ILL`/`TRAP`/
    /// `FPE` are reachable only from fault origins outside `vm_fault`
    /// (alignment, illegal instruction, breakpoint, floating point), which
    /// this crate's machine-independent `VmFaultKind` doesn't carry.
    pub fn from_vm_fault(kind: VmFaultKind) -> Self {
        match kind {
            VmFaultKind::Read | VmFaultKind::Write | VmFaultKind::Readonly => Signal::Segv,
        }
    }
}

/// What drove a trap (`spec.md` §4.5 "three trap sources").
#[derive(Debug, Clone, Copy)]
pub enum TrapKind {
    Interrupt { irq: u32 },
    Syscall { number: u32 },
    VmFault { kind: VmFaultKind, vaddr: usize },
}

/// Minimal machine-independent view of a trap frame: enough to run the
/// stack-region assertion and decide whether the trapping code was running
/// in kernel or user mode (`spec.md` §4.5 step 1). A real port's frame
/// carries full saved registers; those are purely machine-dependent state
/// this crate never inspects.
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    pub pc: usize,
    pub sp: usize,
    pub from_kernel: bool,
}

/// Result of dispatching one trap.
#[derive(Debug)]
pub enum TrapOutcome {
    /// The trapping code may be resumed.
    Resume,
    /// A user-mode fault with no recovery: the offending thread should be
    /// terminated with this error (`spec.md` §4.5 "user-fatal fault").
    Killed(Errno),
    /// A user-mode fatal fault translated to a signal and already delivered
    /// to the faulting thread (`spec.md` §4.5 step 6, §7 "User-level fatal
    /// faults... terminate the faulting process with a reported signal
    /// number").
    Terminated(Signal),
    /// A kernel-mode fault with no armed [`FaultTrampoline`] and no device
    /// handler able to service it: unrecoverable (`spec.md` §4.5
    /// "kernel-fatal fault").
    KernelFatal(&'static str),
}

thread_local! {
    static TRAMPOLINE_ARMED: Cell<bool> = const { Cell::new(false) };
}

/// RAII guard arming the "bad-fault trampoline" for the calling thread:
/// while held, a kernel-mode VM fault recovers to [`TrapOutcome::Killed`]
/// instead of [`TrapOutcome::KernelFatal`] (`spec.md` §4.5, §8 scenario
/// "Bad-fault trampoline" — the safety net a `copyin`/`copyout`-style
/// kernel access to user memory relies on so a bad user pointer doesn't
/// crash the kernel).
#[must_use = "dropping this immediately disarms the trampoline"]
pub struct FaultTrampoline {
    _private: (),
}

impl FaultTrampoline {
    pub fn arm() -> Self {
        TRAMPOLINE_ARMED.with(|c| c.set(true));
        Self { _private: () }
    }
}

impl Drop for FaultTrampoline {
    fn drop(&mut self) {
        TRAMPOLINE_ARMED.with(|c| c.set(false));
    }
}

fn trampoline_armed() -> bool {
    TRAMPOLINE_ARMED.with(Cell::get)
}

/// Terminates the faulting process (`spec.md` §4.5 step 6). Process state
/// beyond a thread's own lifecycle is out of scope (`spec.md` §1); this
/// transitions the faulting thread straight to `Zombie` (the same state
/// `thread_exit` produces) rather than going back through a live
/// `Kernel`/`thread_switch` call, since the dispatcher has no `&Kernel` to
/// call it with — reaping happens the normal way, the next time another
/// thread on this CPU schedules.
fn terminate_process(current: &Arc<Thread>, signal: Signal, vaddr: usize) {
    log::warn!(
        "thread {:?} killed by {signal:?} at {vaddr:#x}{}",
        current.id,
        current.process().map(|p| format!(" (pid {})", p.pid)).unwrap_or_default(),
    );
    current.mark_zombie();
}

type DeviceHandler = Box<dyn Fn() + Send + Sync>;
type SyscallHandler = Box<dyn Fn(&[u64; 6]) -> KResult<i64> + Send + Sync>;

/// Owns the device-IRQ and syscall dispatch tables and runs [`TrapFrame`]s
/// through them. Constructed explicitly and passed around rather than
/// reached through a global, same as [`crate::sched::Kernel`].
pub struct TrapDispatcher {
    devices: Lock<RawSpinlock, HashMap<u32, DeviceHandler>>,
    syscalls: Lock<RawSpinlock, HashMap<u32, SyscallHandler>>,
}

impl TrapDispatcher {
    pub fn new() -> Self {
        Self {
            devices: Lock::new(RawSpinlock::new("trap.devices"), HashMap::new()),
            syscalls: Lock::new(RawSpinlock::new("trap.syscalls"), HashMap::new()),
        }
    }

    pub fn register_device(&self, irq: u32, handler: impl Fn() + Send + Sync + 'static) {
        self.devices.lock().insert(irq, Box::new(handler));
    }

    pub fn register_syscall(&self, number: u32, handler: impl Fn(&[u64; 6]) -> KResult<i64> + Send + Sync + 'static) {
        self.syscalls.lock().insert(number, Box::new(handler));
    }

    /// The single dispatch entry point a machine-dependent trap handler
    /// calls after saving registers (`spec.md` §4.5):
    ///
    /// 1. asserts the trap frame's stack pointer falls inside the current
    ///    thread's stack (catches kernel stack overflow early rather than
    ///    silently corrupting an adjacent thread's stack);
    /// 2. marks `in_interrupt` for the duration of an interrupt trap, so
    ///    [`crate::sync`] can forbid sleeping from interrupt context;
    /// 3. dispatches by trap source.
    pub fn dispatch(
        &self,
        hal: &dyn Hal,
        current: &Arc<Thread>,
        frame: &TrapFrame,
        kind: TrapKind,
        syscall_args: [u64; 6],
    ) -> TrapOutcome {
        assert!(
            current.stack().contains(frame.sp),
            "trap frame stack pointer {:#x} outside current thread {:?}'s stack",
            frame.sp,
            current.id
        );

        match kind {
            TrapKind::Interrupt { irq } => self.dispatch_interrupt(irq),
            TrapKind::Syscall { number } => self.dispatch_syscall(frame, number, &syscall_args),
            TrapKind::VmFault { kind, vaddr } => self.dispatch_vm_fault(hal, current, frame, kind, vaddr),
        }
    }

    fn dispatch_interrupt(&self, irq: u32) -> TrapOutcome {
        let was_in_interrupt = spl::in_interrupt();
        spl::set_in_interrupt(true);
        let handler = self.devices.lock().get(&irq).map(|_| ());
        if handler.is_some() {
            // Re-borrow outside the lock so a handler is free to register
            // further devices without deadlocking on `self.devices`.
            let devices = self.devices.lock();
            if let Some(f) = devices.get(&irq) {
                f();
            }
        } else {
            log::warn!("no handler registered for irq {irq}");
        }
        spl::set_in_interrupt(was_in_interrupt);
        TrapOutcome::Resume
    }

    fn dispatch_syscall(&self, frame: &TrapFrame, number: u32, args: &[u64; 6]) -> TrapOutcome {
        if frame.from_kernel {
            return TrapOutcome::KernelFatal("syscall trap taken from kernel mode");
        }
        let handler = {
            let syscalls = self.syscalls.lock();
            syscalls.get(&number).is_some()
        };
        if !handler {
            return TrapOutcome::Killed(Errno::Enosys);
        }
        let result = {
            let syscalls = self.syscalls.lock();
            (syscalls.get(&number).expect("checked above"))(args)
        };
        match result {
            Ok(_) => TrapOutcome::Resume,
            Err(e) => TrapOutcome::Killed(e),
        }
    }

    fn dispatch_vm_fault(
        &self,
        hal: &dyn Hal,
        current: &Arc<Thread>,
        frame: &TrapFrame,
        kind: VmFaultKind,
        vaddr: usize,
    ) -> TrapOutcome {
        match hal.vm_fault(kind, vaddr) {
            Ok(()) => TrapOutcome::Resume,
            Err(()) if frame.from_kernel && trampoline_armed() => TrapOutcome::Killed(Errno::Efault),
            Err(()) if frame.from_kernel => TrapOutcome::KernelFatal("unrecoverable kernel-mode vm fault"),
            Err(()) => {
                let signal = Signal::from_vm_fault(kind);
                terminate_process(current, signal, vaddr);
                TrapOutcome::Terminated(signal)
            }
        }
    }
}

impl Default for TrapDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::NativeHal;
    use crate::sched::Kernel;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Weak;

    fn current_thread_stub(kernel: &Arc<Kernel>) -> Arc<Thread> {
        kernel.thread_fork("trap-test", Weak::new(), || {})
    }

    #[test]
    fn stack_region_assertion_catches_bad_sp() {
        let kernel = Arc::new(Kernel::new(1, crate::hal::global()));
        let thread = current_thread_stub(&kernel);
        let dispatcher = TrapDispatcher::new();
        let hal = NativeHal::new();
        let frame = TrapFrame { pc: 0, sp: 0xdead_beef, from_kernel: false };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            dispatcher.dispatch(&hal, &thread, &frame, TrapKind::Interrupt { irq: 0 }, [0; 6])
        }));
        assert!(result.is_err(), "expected a panic for an out-of-stack sp");
    }

    #[test]
    fn interrupt_runs_registered_device_handler() {
        let kernel = Arc::new(Kernel::new(1, crate::hal::global()));
        let thread = current_thread_stub(&kernel);
        let dispatcher = TrapDispatcher::new();
        let hal = NativeHal::new();
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);
        dispatcher.register_device(7, move || {
            fired2.fetch_add(1, Ordering::SeqCst);
        });

        let sp = thread.stack().base() as usize;
        let frame = TrapFrame { pc: 0, sp, from_kernel: true };
        let outcome = dispatcher.dispatch(&hal, &thread, &frame, TrapKind::Interrupt { irq: 7 }, [0; 6]);
        assert!(matches!(outcome, TrapOutcome::Resume));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!spl::in_interrupt(), "in_interrupt must be restored after dispatch");
    }

    #[test]
    fn syscall_from_kernel_mode_is_kernel_fatal() {
        let kernel = Arc::new(Kernel::new(1, crate::hal::global()));
        let thread = current_thread_stub(&kernel);
        let dispatcher = TrapDispatcher::new();
        let hal = NativeHal::new();
        let sp = thread.stack().base() as usize;
        let frame = TrapFrame { pc: 0, sp, from_kernel: true };
        let outcome = dispatcher.dispatch(&hal, &thread, &frame, TrapKind::Syscall { number: 1 }, [0; 6]);
        assert!(matches!(outcome, TrapOutcome::KernelFatal(_)));
    }

    #[test]
    fn unregistered_syscall_kills_with_enosys() {
        let kernel = Arc::new(Kernel::new(1, crate::hal::global()));
        let thread = current_thread_stub(&kernel);
        let dispatcher = TrapDispatcher::new();
        let hal = NativeHal::new();
        let sp = thread.stack().base() as usize;
        let frame = TrapFrame { pc: 0, sp, from_kernel: false };
        let outcome = dispatcher.dispatch(&hal, &thread, &frame, TrapKind::Syscall { number: 999 }, [0; 6]);
        assert!(matches!(outcome, TrapOutcome::Killed(Errno::Enosys)));
    }

    #[test]
    fn armed_trampoline_converts_kernel_fault_to_killed() {
        let kernel = Arc::new(Kernel::new(1, crate::hal::global()));
        let thread = current_thread_stub(&kernel);
        let dispatcher = TrapDispatcher::new();
        let hal = NativeHal::new();
        let sp = thread.stack().base() as usize;
        let frame = TrapFrame { pc: 0, sp, from_kernel: true };

        let _trampoline = FaultTrampoline::arm();
        let outcome = dispatcher.dispatch(
            &hal,
            &thread,
            &frame,
            TrapKind::VmFault { kind: VmFaultKind::Read, vaddr: 0x1000 },
            [0; 6],
        );
        assert!(matches!(outcome, TrapOutcome::Killed(Errno::Efault)));
    }

    #[test]
    fn user_mode_vm_fault_terminates_with_segv() {
        let kernel = Arc::new(Kernel::new(1, crate::hal::global()));
        let thread = current_thread_stub(&kernel);
        let dispatcher = TrapDispatcher::new();
        let hal = NativeHal::new();
        let sp = thread.stack().base() as usize;
        let frame = TrapFrame { pc: 0, sp, from_kernel: false };
        let outcome = dispatcher.dispatch(
            &hal,
            &thread,
            &frame,
            TrapKind::VmFault { kind: VmFaultKind::Read, vaddr: 0x3000 },
            [0; 6],
        );
        assert!(matches!(outcome, TrapOutcome::Terminated(Signal::Segv)));
        assert_eq!(thread.state(), crate::sched::ThreadState::Zombie);
    }

    #[test]
    fn unarmed_kernel_vm_fault_is_kernel_fatal() {
        let kernel = Arc::new(Kernel::new(1, crate::hal::global()));
        let thread = current_thread_stub(&kernel);
        let dispatcher = TrapDispatcher::new();
        let hal = NativeHal::new();
        let sp = thread.stack().base() as usize;
        let frame = TrapFrame { pc: 0, sp, from_kernel: true };
        let outcome = dispatcher.dispatch(
            &hal,
            &thread,
            &frame,
            TrapKind::VmFault { kind: VmFaultKind::Write, vaddr: 0x2000 },
            [0; 6],
        );
        assert!(matches!(outcome, TrapOutcome::KernelFatal(_)));
    }
}
