//! x86-64 privileged operations used by the synchronization core.
//!
//! These are the native defaults behind the [`Platform`] hooks: control
//! registers, TLB invalidation, MSR access, interrupt masking and CPUID.
//!
//! [`Platform`]: crate::platform::Platform

use ::x86_64::instructions::{interrupts, tlb};
use ::x86_64::registers::control::{Cr3, Cr3Flags};
use ::x86_64::registers::model_specific::Msr;
use ::x86_64::structures::paging::PhysFrame;
use ::x86_64::{PhysAddr, VirtAddr};

/// Saved interrupt state returned by [`local_irq_save`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "the saved state must be handed back to local_irq_restore"]
pub struct IrqFlags {
    were_enabled: bool,
}

impl IrqFlags {
    pub const fn new(were_enabled: bool) -> Self {
        Self { were_enabled }
    }

    pub const fn were_enabled(self) -> bool {
        self.were_enabled
    }
}

/// CPU features relevant to interrupt controller selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CpuFeatures {
    /// CPUID.01H:EDX[9] - on-chip local APIC
    pub apic: bool,
    /// CPUID.01H:ECX[21] - x2APIC mode supported
    pub x2apic: bool,
}

// ============================================================================
// Interrupt state
// ============================================================================

#[inline]
pub fn irqs_disabled() -> bool {
    !interrupts::are_enabled()
}

/// Mask interrupts on this CPU and return the previous state.
#[inline]
pub fn local_irq_save() -> IrqFlags {
    let were_enabled = interrupts::are_enabled();
    if were_enabled {
        interrupts::disable();
    }
    IrqFlags::new(were_enabled)
}

#[inline]
pub fn local_irq_restore(flags: IrqFlags) {
    if flags.were_enabled() {
        interrupts::enable();
    }
}

// ============================================================================
// Page table root and TLB
// ============================================================================

/// Physical address of the active top-level page table.
#[inline]
pub fn read_cr3() -> u64 {
    let (frame, _) = Cr3::read();
    frame.start_address().as_u64()
}

/// Make `root` the active page table.
///
/// # Safety
/// `root` must be the physical address of a valid PML4 that maps the kernel
/// text, the current stack and this function's caller.
#[inline]
pub unsafe fn write_cr3(root: u64) {
    let frame = PhysFrame::containing_address(PhysAddr::new_truncate(root));
    Cr3::write(frame, Cr3Flags::empty());
}

/// Drop every non-global translation on this CPU by reloading CR3.
#[inline]
pub fn flush_tlb_local() {
    tlb::flush_all();
}

/// Invalidate the translation for one page on this CPU.
#[inline]
pub fn flush_tlb_single(addr: u64) {
    tlb::flush(VirtAddr::new_truncate(addr));
}

// ============================================================================
// MSRs and CPUID
// ============================================================================

/// # Safety
/// `msr` must exist on this CPU, otherwise RDMSR raises #GP.
#[inline]
pub unsafe fn rdmsr(msr: u32) -> u64 {
    Msr::new(msr).read()
}

/// # Safety
/// `msr` must exist and `value` must be legal for it.
#[inline]
pub unsafe fn wrmsr(msr: u32, value: u64) {
    let mut reg = Msr::new(msr);
    reg.write(value);
}

pub fn cpuid_features() -> CpuFeatures {
    // SAFETY: CPUID leaf 1 exists on every x86-64 processor.
    let leaf = unsafe { core::arch::x86_64::__cpuid(1) };
    CpuFeatures {
        apic: leaf.edx & (1 << 9) != 0,
        x2apic: leaf.ecx & (1 << 21) != 0,
    }
}

// ============================================================================
// Delays
// ============================================================================

#[inline]
pub fn rdtsc() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}

/// Busy-wait for at least `us` microseconds.
pub fn udelay(us: u64) {
    let freq = crate::logger::tsc_frequency_hz();
    let ticks = us.saturating_mul(freq) / 1_000_000;
    let start = rdtsc();
    while rdtsc().wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }
}
