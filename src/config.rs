//! Boot-time tunables for the multiprocessor synchronization core.
//!
//! Values here are written once while the boot CPU is still alone and are
//! read-mostly afterwards. They are plain atomics so that readers on any CPU
//! never need a lock.

use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Default single-page flush ceiling, in pages.
///
/// A full flush costs roughly as much as 33 `invlpg` instructions at about
/// 100 ns each, which caps the page-by-page path at ~3 us while still
/// covering the vast majority of real flush requests.
pub const DEFAULT_TLB_SINGLE_PAGE_FLUSH_CEILING: usize = 33;

/// Default number of polls in `safe_wait_icr_idle` before giving up.
pub const DEFAULT_ICR_WAIT_RETRIES: u32 = 1000;

/// Default delay between two polls of the ICR busy bit.
pub const DEFAULT_ICR_RETRY_DELAY_US: u32 = 100;

static TLB_SINGLE_PAGE_FLUSH_CEILING: AtomicUsize =
    AtomicUsize::new(DEFAULT_TLB_SINGLE_PAGE_FLUSH_CEILING);
static ICR_WAIT_RETRIES: AtomicU32 = AtomicU32::new(DEFAULT_ICR_WAIT_RETRIES);
static ICR_RETRY_DELAY_US: AtomicU32 = AtomicU32::new(DEFAULT_ICR_RETRY_DELAY_US);

/// Ranged flushes covering more pages than this degrade to a full flush.
#[inline]
pub fn tlb_single_page_flush_ceiling() -> usize {
    TLB_SINGLE_PAGE_FLUSH_CEILING.load(Ordering::Relaxed)
}

pub fn set_tlb_single_page_flush_ceiling(pages: usize) {
    TLB_SINGLE_PAGE_FLUSH_CEILING.store(pages, Ordering::Relaxed);
    crate::kdebug!("mpsync: tlb_single_page_flush_ceiling = {} pages", pages);
}

#[inline]
pub fn icr_wait_retries() -> u32 {
    ICR_WAIT_RETRIES.load(Ordering::Relaxed)
}

#[inline]
pub fn icr_retry_delay_us() -> u32 {
    ICR_RETRY_DELAY_US.load(Ordering::Relaxed)
}

/// Set the bound used by `safe_wait_icr_idle`.
pub fn set_icr_wait_params(retries: u32, delay_us: u32) {
    ICR_WAIT_RETRIES.store(retries, Ordering::Relaxed);
    ICR_RETRY_DELAY_US.store(delay_us, Ordering::Relaxed);
}

/// Restore every tunable to its built-in default.
pub fn reset_defaults() {
    TLB_SINGLE_PAGE_FLUSH_CEILING.store(DEFAULT_TLB_SINGLE_PAGE_FLUSH_CEILING, Ordering::Relaxed);
    ICR_WAIT_RETRIES.store(DEFAULT_ICR_WAIT_RETRIES, Ordering::Relaxed);
    ICR_RETRY_DELAY_US.store(DEFAULT_ICR_RETRY_DELAY_US, Ordering::Relaxed);
}

/// Point-in-time copy of the tunables and compiled-in features.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MpSyncConfig {
    pub tlb_single_page_flush_ceiling: usize,
    pub icr_wait_retries: u32,
    pub icr_retry_delay_us: u32,
    pub smp: bool,
    pub preempt: bool,
    pub x2apic: bool,
}

pub fn snapshot() -> MpSyncConfig {
    MpSyncConfig {
        tlb_single_page_flush_ceiling: tlb_single_page_flush_ceiling(),
        icr_wait_retries: icr_wait_retries(),
        icr_retry_delay_us: icr_retry_delay_us(),
        smp: cfg!(feature = "smp"),
        preempt: cfg!(feature = "preempt"),
        x2apic: cfg!(feature = "x2apic"),
    }
}

impl fmt::Display for MpSyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "flush_ceiling={} icr_retries={} icr_delay={}us smp={} preempt={} x2apic={}",
            self.tlb_single_page_flush_ceiling,
            self.icr_wait_retries,
            self.icr_retry_delay_us,
            self.smp,
            self.preempt,
            self.x2apic
        )
    }
}
