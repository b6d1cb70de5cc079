//! End-to-end scenarios exercising whole call chains across module
//! boundaries, one per concrete walkthrough named in `spec.md` §8.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use os161_core::errno::Errno;
use os161_core::hal::{self, Hal, NativeHal, VmFaultKind};
use os161_core::sched::{self, Kernel};
use os161_core::spl;
use os161_core::sync::{CondVar, KMutex, RawKMutex, Semaphore};
use os161_core::trap::{FaultTrampoline, TrapDispatcher, TrapFrame, TrapKind, TrapOutcome};
use os161_core::vfs::device::NullDevice;
use os161_core::vfs::vnode::{Vnode, VnodeOps, VnodeType};
use os161_core::vfs::Vfs;

fn settle() {
    std::thread::sleep(Duration::from_millis(10));
}

#[test]
fn semaphore_wakes_waiters_in_fifo_order() {
    let kernel = Arc::new(Kernel::new(1, hal::global()));
    let sem = Arc::new(Semaphore::new("scenario", 0));
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let sem = Arc::clone(&sem);
        let kernel2 = Arc::clone(&kernel);
        let order = Arc::clone(&order);
        kernel.thread_fork(format!("waiter-{i}"), Weak::new(), move || {
            let me = sched::current_thread().unwrap();
            sem.wait(&kernel2, &me);
            order.lock().unwrap().push(i);
        });
    }

    for _ in 0..3 {
        kernel.run_one(0);
        settle();
    }

    for _ in 0..3 {
        sem.signal(&kernel);
        settle();
        kernel.run_one(0);
        settle();
    }

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
}

#[test]
fn condvar_broadcast_wakes_every_waiter() {
    let kernel = Arc::new(Kernel::new(1, hal::global()));
    let mutex: Arc<KMutex<bool>> = Arc::new(KMutex::new(RawKMutex::new("scenario.mutex"), false));
    let cv = Arc::new(CondVar::new("scenario.cv"));
    let woken = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let kernel2 = Arc::clone(&kernel);
        let mutex = Arc::clone(&mutex);
        let cv = Arc::clone(&cv);
        let woken = Arc::clone(&woken);
        kernel.thread_fork(format!("cv-waiter-{i}"), Weak::new(), move || {
            let me = sched::current_thread().unwrap();
            let mut guard = mutex.lock();
            while !*guard {
                guard = cv.wait(&kernel2, &me, guard);
            }
            woken.fetch_add(1, Ordering::SeqCst);
        });
    }

    for _ in 0..3 {
        kernel.run_one(0);
        settle();
    }

    *mutex.lock() = true;
    cv.broadcast(&kernel);
    settle();
    for _ in 0..3 {
        kernel.run_one(0);
        settle();
    }

    assert_eq!(woken.load(Ordering::SeqCst), 3);
}

struct ScenarioDir {
    children: Mutex<std::collections::HashMap<String, Arc<Vnode>>>,
}

impl VnodeOps for ScenarioDir {
    fn lookup(&self, name: &str) -> os161_core::errno::KResult<Arc<Vnode>> {
        self.children.lock().unwrap().get(name).cloned().ok_or(Errno::Enoent)
    }
    fn gettype(&self) -> os161_core::errno::KResult<VnodeType> {
        Ok(VnodeType::Directory)
    }
}

#[test]
fn path_resolution_walks_through_a_mounted_device() {
    let vfs = Vfs::new();
    let leaf = Vnode::new(Arc::new(NullDevice));
    let mut children = std::collections::HashMap::new();
    children.insert("greeting".to_string(), leaf);
    let root = Vnode::new(Arc::new(ScenarioDir { children: Mutex::new(children) }));

    vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();
    vfs.mount("emu0", root).unwrap();
    vfs.set_root_device("emu0").unwrap();

    let via_device = vfs.resolve("emu0:greeting").unwrap();
    let via_root = vfs.resolve("/greeting").unwrap();
    assert_eq!(via_device.ops().gettype().unwrap(), VnodeType::CharDevice);
    assert_eq!(via_root.ops().gettype().unwrap(), VnodeType::CharDevice);
    assert_eq!(vfs.resolve("/missing").unwrap_err(), Errno::Enoent);
}

#[test]
fn unmount_refuses_while_root_is_referenced_elsewhere() {
    let vfs = Vfs::new();
    let root = Vnode::new(Arc::new(ScenarioDir { children: Mutex::new(std::collections::HashMap::new()) }));
    let held_open = Arc::clone(&root);
    held_open.incref();

    vfs.add_device("emu0", Vnode::new(Arc::new(NullDevice))).unwrap();
    vfs.mount("emu0", root).unwrap();

    assert_eq!(vfs.unmount("emu0").unwrap_err(), Errno::Ebusy);

    held_open.decref().unwrap();
    assert!(vfs.unmount("emu0").is_ok());
}

#[test]
fn bad_fault_trampoline_converts_kernel_fault_to_recoverable_error() {
    let kernel = Arc::new(Kernel::new(1, hal::global()));
    let thread = kernel.thread_fork("trap-scenario", Weak::new(), || {});
    let dispatcher = TrapDispatcher::new();
    let native = NativeHal::new();
    let sp = thread.stack().base() as usize;
    let frame = TrapFrame { pc: 0, sp, from_kernel: true };

    let unarmed = dispatcher.dispatch(&native, &thread, &frame, TrapKind::VmFault { kind: VmFaultKind::Read, vaddr: 0x4000 }, [0; 6]);
    assert!(matches!(unarmed, TrapOutcome::KernelFatal(_)));

    let _trampoline = FaultTrampoline::arm();
    let armed = dispatcher.dispatch(&native, &thread, &frame, TrapKind::VmFault { kind: VmFaultKind::Read, vaddr: 0x4000 }, [0; 6]);
    assert!(matches!(armed, TrapOutcome::Killed(Errno::Efault)));
}

#[test]
fn priority_level_nesting_matches_the_worked_example() {
    let native = NativeHal::new();
    let h: &dyn hal::Hal = &native;
    h.cpu_irqon();

    let s_red = spl::splhigh(h);
    let s = spl::splhigh(h);
    let s_blue = spl::splhigh(h);

    spl::splx(h, s);
    assert!(!h.irq_enabled(), "still nested under red and blue");
    spl::splx(h, s_red);
    assert!(!h.irq_enabled(), "still nested under blue");
    spl::splx(h, s_blue);
    assert!(h.irq_enabled(), "last raise released, interrupts back on");
    assert_eq!(spl::iplhigh_count(), 0);
}
