//! Architecture-specific code
//!
//! Only x86-64 is supported. The functions here execute privileged
//! instructions directly; everything else in the crate reaches them through
//! [`crate::platform::Platform`] so that the scheduler-facing logic can run
//! against emulated hardware.

pub mod x86_64;

pub use self::x86_64::{
    cpuid_features, flush_tlb_local, flush_tlb_single, irqs_disabled, local_irq_restore,
    local_irq_save, rdmsr, rdtsc, read_cr3, udelay, write_cr3, wrmsr, CpuFeatures, IrqFlags,
};
