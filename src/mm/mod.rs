//! Address-space handles and TLB maintenance
//!
//! Page tables themselves belong to the paging subsystem. This module only
//! knows an address space by its id, the physical address of its top-level
//! table and the set of CPUs currently running it.
//!
//! - `tlb`: TLB shootdown and the address-space switch

pub mod tlb;

use crate::percpu::{AtomicCpuMask, CpuId, CpuMask};

pub use tlb::{
    flush_tlb_current_task, flush_tlb_mm_range, flush_tlb_others, reset_tlb_stats, switch_mm,
    switch_mm_irqs_off, tlb_stats, FlushTlbInfo, TlbStats, TLB_FLUSH_ALL,
};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Identifier of an address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MmId(pub u64);

/// Identifier of the task on whose behalf an address-space switch happens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// Physical address of a top-level page table (the CR3 value).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageTableRoot(u64);

impl PageTableRoot {
    /// Returns `None` unless `phys` is 4 KiB aligned and non-zero.
    pub const fn new(phys: u64) -> Option<Self> {
        if phys == 0 || phys & (PAGE_SIZE - 1) != 0 {
            None
        } else {
            Some(Self(phys))
        }
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

/// An address space as seen by the TLB code.
///
/// The scheduler owns the CPU set and is the only writer; the flush engine
/// takes snapshots of it.
pub struct AddressSpace {
    id: MmId,
    root: PageTableRoot,
    cpus: AtomicCpuMask,
}

impl AddressSpace {
    pub const fn new(id: MmId, root: PageTableRoot) -> Self {
        Self {
            id,
            root,
            cpus: AtomicCpuMask::new(),
        }
    }

    pub fn id(&self) -> MmId {
        self.id
    }

    pub fn root(&self) -> PageTableRoot {
        self.root
    }

    /// CPUs that may hold translations for this space.
    pub fn cpumask(&self) -> CpuMask {
        self.cpus.snapshot()
    }

    pub fn is_active_on(&self, cpu: CpuId) -> bool {
        self.cpus.test(cpu)
    }

    /// Scheduler hook: `cpu` started running this space.
    pub fn mark_cpu_active(&self, cpu: CpuId) {
        self.cpus.set(cpu);
    }

    /// Scheduler hook: `cpu` stopped running this space.
    pub fn clear_cpu_active(&self, cpu: CpuId) {
        self.cpus.clear(cpu);
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("root", &format_args!("{:#x}", self.root.0))
            .field("cpus", &self.cpus.snapshot())
            .finish()
    }
}
