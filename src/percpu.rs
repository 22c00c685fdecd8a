//! CPU-indexed resource tables and CPU sets
//!
//! Per-CPU state lives in arrays indexed by logical CPU id. A slot is only
//! touched by the CPU that owns it, and only while that CPU has preemption
//! disabled, so access goes through a [`PreemptGuard`] rather than through a
//! lock.
//!
//! [`PreemptGuard`]: crate::preempt::PreemptGuard

use core::sync::atomic::{AtomicU64, Ordering};

use crate::preempt::PreemptGuard;

/// Logical CPU identifier (0 .. MAX_CPUS)
pub type CpuId = u16;

/// Maximum number of CPUs supported
pub const MAX_CPUS: usize = 256;

const MASK_WORDS: usize = MAX_CPUS / 64;

// ============================================================================
// PerCpu<T>
// ============================================================================

/// One `T` per CPU.
///
/// `T` is expected to be an atomic or otherwise `Sync` type: the owning CPU
/// mutates its slot through shared references, and diagnostic code on other
/// CPUs may read it.
#[repr(C, align(64))]
pub struct PerCpu<T> {
    slots: [T; MAX_CPUS],
}

impl<T> PerCpu<T> {
    pub const fn from_array(slots: [T; MAX_CPUS]) -> Self {
        Self { slots }
    }

    /// Slot of the CPU pinned by `guard`.
    #[inline]
    pub fn get(&self, guard: &PreemptGuard) -> &T {
        &self.slots[guard.cpu() as usize]
    }

    /// Slot of `cpu`, which must be below `MAX_CPUS`.
    #[inline]
    pub(crate) fn slot(&self, cpu: CpuId) -> &T {
        debug_assert!(
            (cpu as usize) < MAX_CPUS,
            "CPU id {} out of range (MAX_CPUS = {})",
            cpu,
            MAX_CPUS
        );
        &self.slots[cpu as usize]
    }

    /// Slot of an explicit CPU (boot-time setup and diagnostics only).
    #[inline]
    pub fn for_cpu(&self, cpu: CpuId) -> Option<&T> {
        self.slots.get(cpu as usize)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.slots.iter()
    }
}

// ============================================================================
// CpuMask
// ============================================================================

/// A set of logical CPUs.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuMask {
    bits: [u64; MASK_WORDS],
}

impl CpuMask {
    pub const fn new() -> Self {
        Self {
            bits: [0; MASK_WORDS],
        }
    }

    /// Mask containing only `cpu`.
    pub fn single(cpu: CpuId) -> Self {
        let mut mask = Self::new();
        mask.set(cpu);
        mask
    }

    /// Mask containing CPUs `0..nr_cpus`.
    pub fn first_n(nr_cpus: usize) -> Self {
        let mut mask = Self::new();
        for cpu in 0..nr_cpus.min(MAX_CPUS) {
            mask.set(cpu as CpuId);
        }
        mask
    }

    #[inline]
    pub fn set(&mut self, cpu: CpuId) {
        if let Some((word, bit)) = locate(cpu) {
            self.bits[word] |= bit;
        }
    }

    #[inline]
    pub fn clear(&mut self, cpu: CpuId) {
        if let Some((word, bit)) = locate(cpu) {
            self.bits[word] &= !bit;
        }
    }

    #[inline]
    pub fn test(&self, cpu: CpuId) -> bool {
        match locate(cpu) {
            Some((word, bit)) => self.bits[word] & bit != 0,
            None => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    /// Number of CPUs in the set.
    pub fn weight(&self) -> u32 {
        self.bits.iter().map(|w| w.count_ones()).sum()
    }

    /// Any CPU in the set other than `cpu`.
    pub fn any_but(&self, cpu: CpuId) -> Option<CpuId> {
        self.iter().find(|&c| c != cpu)
    }

    /// Copy of this set without `cpu`.
    pub fn without(&self, cpu: CpuId) -> Self {
        let mut mask = *self;
        mask.clear(cpu);
        mask
    }

    pub fn iter(&self) -> CpuMaskIter<'_> {
        CpuMaskIter {
            mask: self,
            word: 0,
            pending: self.bits[0],
        }
    }
}

impl core::fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl FromIterator<CpuId> for CpuMask {
    fn from_iter<I: IntoIterator<Item = CpuId>>(iter: I) -> Self {
        let mut mask = CpuMask::new();
        for cpu in iter {
            mask.set(cpu);
        }
        mask
    }
}

pub struct CpuMaskIter<'a> {
    mask: &'a CpuMask,
    word: usize,
    pending: u64,
}

impl Iterator for CpuMaskIter<'_> {
    type Item = CpuId;

    fn next(&mut self) -> Option<CpuId> {
        loop {
            if self.pending != 0 {
                let bit = self.pending.trailing_zeros() as usize;
                self.pending &= self.pending - 1;
                return Some((self.word * 64 + bit) as CpuId);
            }
            self.word += 1;
            if self.word >= MASK_WORDS {
                return None;
            }
            self.pending = self.mask.bits[self.word];
        }
    }
}

#[inline]
fn locate(cpu: CpuId) -> Option<(usize, u64)> {
    let cpu = cpu as usize;
    if cpu < MAX_CPUS {
        Some((cpu / 64, 1u64 << (cpu % 64)))
    } else {
        None
    }
}

// ============================================================================
// AtomicCpuMask
// ============================================================================

/// A CPU set that one party updates while others read it concurrently.
///
/// Used for "CPUs currently running this address space": the scheduler sets
/// and clears bits on context switch, the TLB code takes snapshots.
pub struct AtomicCpuMask {
    bits: [AtomicU64; MASK_WORDS],
}

impl AtomicCpuMask {
    pub const fn new() -> Self {
        Self {
            bits: [const { AtomicU64::new(0) }; MASK_WORDS],
        }
    }

    pub fn set(&self, cpu: CpuId) {
        if let Some((word, bit)) = locate(cpu) {
            self.bits[word].fetch_or(bit, Ordering::AcqRel);
        }
    }

    pub fn clear(&self, cpu: CpuId) {
        if let Some((word, bit)) = locate(cpu) {
            self.bits[word].fetch_and(!bit, Ordering::AcqRel);
        }
    }

    pub fn test(&self, cpu: CpuId) -> bool {
        match locate(cpu) {
            Some((word, bit)) => self.bits[word].load(Ordering::Acquire) & bit != 0,
            None => false,
        }
    }

    pub fn snapshot(&self) -> CpuMask {
        let mut mask = CpuMask::new();
        for (dst, src) in mask.bits.iter_mut().zip(self.bits.iter()) {
            *dst = src.load(Ordering::Acquire);
        }
        mask
    }
}

impl Default for AtomicCpuMask {
    fn default() -> Self {
        Self::new()
    }
}
