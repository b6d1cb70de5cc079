//! Interrupt priority level (`spec.md` §4.1, component 1 of §2).
//!
//! Only two logical levels exist (interrupts-on / interrupts-off), but the
//! counter-based design composes across arbitrarily nested critical sections
//! and spinlock acquire/release without either caller needing to know how
//! deeply nested the other is — the worked example in §4.1:
//!
//! ```text
//! acquire(red); s = splhigh(); acquire(blue); splx(s); release(red); release(blue)
//! ```
//!
//! State is tracked per OS thread (standing in for "per kernel thread" —
//! `spec.md` §3 lists `curspl`/`iplhigh_count`/`in_interrupt` as Thread
//! attributes; since each [`crate::sched::Thread`] in this port is backed
//! 1:1 by a real OS thread, a thread-local is the natural place for the
//! single source of truth, and `Thread` reads through to it rather than
//! keeping a second copy).

use std::cell::Cell;

use crate::hal::Hal;

/// The two logical interrupt priority levels (`spec.md` §4.1: "Only two
/// logical levels exist... the interface is designed so additional levels
/// could be added without source changes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IplLevel {
    /// Interrupts enabled.
    None,
    /// Interrupts disabled.
    High,
}

thread_local! {
    static IPLHIGH_COUNT: Cell<u32> = const { Cell::new(0) };
    static IN_INTERRUPT: Cell<bool> = const { Cell::new(false) };
}

/// Raises the interrupt priority level to `IPL_HIGH`, returning the level
/// that was in effect beforehand. The first raise (count 0→1) performs the
/// hardware disable; nested raises just bump the counter.
pub fn splhigh(hal: &dyn Hal) -> IplLevel {
    let count = IPLHIGH_COUNT.with(Cell::get);
    let old = if count == 0 { IplLevel::None } else { IplLevel::High };
    if count == 0 {
        hal.cpu_irqoff();
    }
    IPLHIGH_COUNT.with(|c| c.set(count + 1));
    old
}

/// Forces the interrupt priority level down to `IPL_NONE` unconditionally,
/// clearing any nesting, and returns the level that was in effect
/// beforehand. Used only at points that must guarantee interrupts are on
/// regardless of how they got here (e.g. thread startup).
pub fn spl0(hal: &dyn Hal) -> IplLevel {
    let count = IPLHIGH_COUNT.with(Cell::get);
    let old = if count == 0 { IplLevel::None } else { IplLevel::High };
    IPLHIGH_COUNT.with(|c| c.set(0));
    hal.cpu_irqon();
    old
}

/// Restores the interrupt priority level saved by a matching [`splhigh`].
/// Interrupts come back on only once every matching raise has been undone
/// (`spec.md` §4.1: "interrupts come back on only when all raises are
/// released").
///
/// # Panics
///
/// Panics if called without a matching outstanding [`splhigh`] — this is one
/// of the programming-error assertions from `spec.md` §7 tier 2
/// ("unbalanced SPL").
pub fn splx(hal: &dyn Hal, _old: IplLevel) {
    let count = IPLHIGH_COUNT.with(Cell::get);
    let new = count.checked_sub(1).expect("splx: unbalanced SPL (no matching splhigh)");
    IPLHIGH_COUNT.with(|c| c.set(new));
    if new == 0 {
        hal.cpu_irqon();
    }
}

/// Current nesting depth of outstanding [`splhigh`] raises on this thread.
pub fn iplhigh_count() -> u32 {
    IPLHIGH_COUNT.with(Cell::get)
}

/// Current logical level on this thread.
pub fn current_level() -> IplLevel {
    if iplhigh_count() == 0 {
        IplLevel::None
    } else {
        IplLevel::High
    }
}

/// Marks whether the calling thread is currently executing an interrupt
/// handler (`spec.md` §3 Thread attribute `in_interrupt`; §4.5 step 3). Only
/// the trap dispatcher should call this.
pub fn set_in_interrupt(value: bool) {
    IN_INTERRUPT.with(|c| c.set(value));
}

/// Whether the calling thread is currently executing an interrupt handler.
/// Consulted by [`crate::sched`] to forbid suspension from interrupt context
/// (`spec.md` §5 "Suspension points").
pub fn in_interrupt() -> bool {
    IN_INTERRUPT.with(Cell::get)
}

/// RAII guard around a [`splhigh`]/[`splx`] pair, for call sites that want
/// scope-based release instead of manually threading the saved level
/// through. This is additive convenience, not a separate primitive: it wraps
/// exactly the `splhigh`/`splx` pair above.
#[must_use = "dropping this immediately re-lowers the interrupt priority level"]
pub struct SplGuard<'a> {
    hal: &'a dyn Hal,
    old: IplLevel,
    armed: bool,
}

impl<'a> SplGuard<'a> {
    pub fn new(hal: &'a dyn Hal) -> Self {
        let old = splhigh(hal);
        Self { hal, old, armed: true }
    }

    /// Releases early, before the guard goes out of scope.
    pub fn release(mut self) {
        self.armed = false;
        splx(self.hal, self.old);
    }
}

impl Drop for SplGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            splx(self.hal, self.old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::NativeHal;

    #[test]
    fn splx_of_splhigh_is_a_no_op_on_hardware_state() {
        let hal = NativeHal::new();
        hal.cpu_irqon();
        let s = splhigh(&hal);
        splx(&hal, s);
        assert!(hal.irq_enabled());
        assert_eq!(iplhigh_count(), 0);
    }

    #[test]
    fn nested_raises_compose() {
        // acquire(red); s = splhigh(); acquire(blue); splx(s); release(red); release(blue)
        let hal = NativeHal::new();
        hal.cpu_irqon();

        let s_red = splhigh(&hal); // simulates spinlock "red" acquire's implicit raise
        assert!(!hal.irq_enabled());

        let s = splhigh(&hal);
        assert!(!hal.irq_enabled());

        let s_blue = splhigh(&hal); // simulates spinlock "blue" acquire's implicit raise
        assert!(!hal.irq_enabled());

        splx(&hal, s);
        assert!(!hal.irq_enabled(), "still nested under red and blue");

        splx(&hal, s_red); // release(red)
        assert!(!hal.irq_enabled(), "still nested under blue");

        splx(&hal, s_blue); // release(blue)
        assert!(hal.irq_enabled(), "last raise released, hardware back on");
        assert_eq!(iplhigh_count(), 0);
    }

    #[test]
    #[should_panic(expected = "unbalanced SPL")]
    fn splx_without_matching_raise_panics() {
        let hal = NativeHal::new();
        splx(&hal, IplLevel::None);
    }

    #[test]
    fn spl0_forces_interrupts_on_and_clears_nesting() {
        let hal = NativeHal::new();
        hal.cpu_irqon();
        let _ = splhigh(&hal);
        let _ = splhigh(&hal);
        assert_eq!(iplhigh_count(), 2);
        spl0(&hal);
        assert_eq!(iplhigh_count(), 0);
        assert!(hal.irq_enabled());
    }
}
