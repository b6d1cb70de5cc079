//! Inter-processor interrupts (`spec.md` §4.3 "IPIs").

use bitflags::bitflags;

bitflags! {
    /// Pending-IPI bitmap for one [`super::Cpu`]. Several IPI kinds can be
    /// pending at once, and they coalesce: two shootdowns requested before
    /// either is serviced still only need the shootdown queue drained once
    /// (`spec.md` §4.3: "IPIs of the same kind coalesce; a CPU servicing one
    /// pending IPI of a kind satisfies all such requests queued before it
    /// began servicing").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IpiKind: u8 {
        /// Stop this CPU (`spec.md` §4.3: "PANIC (stop this CPU)").
        const PANIC        = 0b0001;
        /// Leave the scheduler: stop accepting placements and migrations
        /// (`spec.md` §4.3: "OFFLINE (leave the scheduler)").
        const OFFLINE      = 0b0010;
        /// Runnable threads exist elsewhere; wake from idle (`spec.md`
        /// §4.3: "UNIDLE (runnable threads exist elsewhere — wake from
        /// idle)").
        const UNIDLE       = 0b0100;
        /// Consult the per-CPU shootdown queue (`spec.md` §4.3:
        /// "TLBSHOOTDOWN (consult per-CPU shootdown queue, if full flush
        /// entire TLB)").
        const TLBSHOOTDOWN = 0b1000;
    }
}
