//! TLB shootdown and address-space switch
//!
//! A mapping change is made visible in two steps: the initiating CPU
//! invalidates its own TLB, then every other CPU that currently runs the
//! address space is asked to do the same through a synchronous cross-CPU
//! call. Both steps happen with preemption disabled, so "this CPU" stays the
//! same CPU for the whole sequence, and the initiator only returns once all
//! targets have finished.
//!
//! Small ranges are invalidated page by page; anything above
//! [`config::tlb_single_page_flush_ceiling`] pages becomes a full flush on
//! every CPU involved.

use core::sync::atomic::{fence, AtomicU64, Ordering};

use crate::config;
use crate::percpu::CpuMask;
use crate::platform::{self, Platform};
use crate::preempt::PreemptGuard;

use super::{AddressSpace, MmId, TaskId, PAGE_SHIFT, PAGE_SIZE};

/// `end` value meaning "the whole address space".
pub const TLB_FLUSH_ALL: u64 = u64::MAX;

/// One shootdown request, shared read-only with every target CPU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushTlbInfo {
    pub mm: MmId,
    pub start: u64,
    pub end: u64,
}

impl FlushTlbInfo {
    #[inline]
    pub fn is_full(&self) -> bool {
        self.end == TLB_FLUSH_ALL
    }
}

// ============================================================================
// Statistics
// ============================================================================

static STATS_FULL_FLUSHES: AtomicU64 = AtomicU64::new(0);
static STATS_SINGLE_PAGE_FLUSHES: AtomicU64 = AtomicU64::new(0);
static STATS_REMOTE_REQUESTS: AtomicU64 = AtomicU64::new(0);
static STATS_REMOTE_HANDLER_RUNS: AtomicU64 = AtomicU64::new(0);

/// Shootdown counters, summed over all CPUs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TlbStats {
    /// Whole-TLB flushes executed, local and remote
    pub full_flushes: u64,
    /// Individual `invlpg`s executed, local and remote
    pub single_page_flushes: u64,
    /// Cross-CPU flush requests sent
    pub remote_requests: u64,
    /// Flush handler executions on target CPUs
    pub remote_handler_runs: u64,
}

pub fn tlb_stats() -> TlbStats {
    TlbStats {
        full_flushes: STATS_FULL_FLUSHES.load(Ordering::Relaxed),
        single_page_flushes: STATS_SINGLE_PAGE_FLUSHES.load(Ordering::Relaxed),
        remote_requests: STATS_REMOTE_REQUESTS.load(Ordering::Relaxed),
        remote_handler_runs: STATS_REMOTE_HANDLER_RUNS.load(Ordering::Relaxed),
    }
}

pub fn reset_tlb_stats() {
    STATS_FULL_FLUSHES.store(0, Ordering::Relaxed);
    STATS_SINGLE_PAGE_FLUSHES.store(0, Ordering::Relaxed);
    STATS_REMOTE_REQUESTS.store(0, Ordering::Relaxed);
    STATS_REMOTE_HANDLER_RUNS.store(0, Ordering::Relaxed);
}

// ============================================================================
// Local invalidation
// ============================================================================

fn local_flush_all(p: &dyn Platform) {
    p.flush_tlb_local();
    // Stands in for the serializing CR3 reload.
    fence(Ordering::SeqCst);
    STATS_FULL_FLUSHES.fetch_add(1, Ordering::Relaxed);
}

fn local_flush_range(p: &dyn Platform, start: u64, end: u64) {
    let mut pages = 0;
    let mut addr = start;
    while addr < end {
        p.flush_tlb_single(addr);
        pages += 1;
        match addr.checked_add(PAGE_SIZE) {
            Some(next) => addr = next,
            None => break,
        }
    }
    fence(Ordering::SeqCst);
    STATS_SINGLE_PAGE_FLUSHES.fetch_add(pages, Ordering::Relaxed);
}

/// Target-side handler of a shootdown request.
pub fn flush_tlb_func(info: &FlushTlbInfo) {
    STATS_REMOTE_HANDLER_RUNS.fetch_add(1, Ordering::Relaxed);
    let p = platform::get();
    if info.is_full() {
        local_flush_all(p);
    } else {
        local_flush_range(p, info.start, info.end);
    }
}

// ============================================================================
// Shootdown
// ============================================================================

#[cfg(feature = "smp")]
fn dispatch(p: &dyn Platform, targets: &CpuMask, info: &FlushTlbInfo) {
    STATS_REMOTE_REQUESTS.fetch_add(1, Ordering::Relaxed);
    p.call_function_many(targets, &|| flush_tlb_func(info), true);
}

#[cfg(not(feature = "smp"))]
fn dispatch(_p: &dyn Platform, _targets: &CpuMask, _info: &FlushTlbInfo) {}

/// Ask every CPU in `mask` except the caller to flush `[start, end)` of `mm`.
///
/// `end == 0` means the single page at `start`. Returns after all targets
/// have flushed.
pub fn flush_tlb_others(mask: &CpuMask, mm: &AddressSpace, start: u64, end: u64) {
    let end = if end == 0 {
        start.saturating_add(PAGE_SIZE)
    } else {
        end
    };
    let info = FlushTlbInfo {
        mm: mm.id(),
        start,
        end,
    };

    let guard = PreemptGuard::new();
    let targets = mask.without(guard.cpu());
    if targets.is_empty() {
        return;
    }

    crate::ktrace!(
        "TLB: cpu {} shootdown {:?} [{:#x}, {:#x}) -> {:?}",
        guard.cpu(),
        info.mm,
        info.start,
        info.end,
        targets
    );
    dispatch(platform::get(), &targets, &info);
}

/// Flush the calling task's whole address space on every CPU running it.
pub fn flush_tlb_current_task() {
    let guard = PreemptGuard::new();
    let p = platform::get();

    local_flush_all(p);

    if let Some(mm) = p.current_mm() {
        let cpus = mm.cpumask();
        if cpus.any_but(guard.cpu()).is_some() {
            flush_tlb_others(&cpus, mm, 0, TLB_FLUSH_ALL);
        }
    }
}

/// Flush `[start, end)` of `mm` everywhere it is live.
pub fn flush_tlb_mm_range(mm: &AddressSpace, start: u64, end: u64) {
    let nr_pages = if end == TLB_FLUSH_ALL {
        TLB_FLUSH_ALL
    } else {
        end.saturating_sub(start) >> PAGE_SHIFT
    };

    let guard = PreemptGuard::new();
    let p = platform::get();

    let (start, end) = if nr_pages > config::tlb_single_page_flush_ceiling() as u64 {
        local_flush_all(p);
        (0, TLB_FLUSH_ALL)
    } else {
        local_flush_range(p, start, end);
        (start, end)
    };

    let cpus = mm.cpumask();
    if cpus.any_but(guard.cpu()).is_some() {
        flush_tlb_others(&cpus, mm, start, end);
    }
}

// ============================================================================
// Address-space switch
// ============================================================================

/// Load `next`'s page tables unless it is already the active space.
///
/// Interrupts must be disabled.
pub fn switch_mm_irqs_off(prev: &AddressSpace, next: &AddressSpace, task: TaskId) {
    if core::ptr::eq(prev, next) {
        return;
    }
    crate::ktrace!("mm: {:?} switch {:?} -> {:?}", task, prev.id(), next.id());
    platform::get().load_cr3(next.root());
}

pub fn switch_mm(prev: &AddressSpace, next: &AddressSpace, task: TaskId) {
    let p = platform::get();
    let flags = p.local_irq_save();
    switch_mm_irqs_off(prev, next, task);
    p.local_irq_restore(flags);
}
