//! Collaborator hooks
//!
//! The synchronization core depends on services owned elsewhere in the
//! kernel: the scheduler (current CPU, current address space, reschedule),
//! the cross-CPU call dispatcher, and the raw CPU instructions for interrupt
//! masking, CR3, TLB and MSR access. All of them are reached through the
//! [`Platform`] trait, which the kernel installs once during boot.
//!
//! The instruction-level hooks default to the native x86-64 implementations
//! in [`crate::arch`]; a kernel normally overrides only the scheduler and
//! dispatcher hooks.
//!
//! Until [`install`] runs, [`get`] hands out a uniprocessor boot platform:
//! CPU 0, no current address space, no remote CPUs.

use spin::Once;

use crate::arch::{self, CpuFeatures, IrqFlags};
use crate::mm::{AddressSpace, PageTableRoot};
use crate::percpu::{CpuId, CpuMask};

pub trait Platform: Sync {
    // ------------------------------------------------------------------
    // Scheduler and dispatcher collaborators
    // ------------------------------------------------------------------

    /// Logical id of the CPU executing the caller, below `MAX_CPUS`.
    fn cpu_id(&self) -> CpuId;

    /// Number of CPUs that may receive IPIs.
    fn nr_cpus(&self) -> usize;

    /// Address space of the task running on this CPU, if it has one.
    ///
    /// The scheduler keeps the returned space alive while its task runs here.
    fn current_mm(&self) -> Option<&'static AddressSpace>;

    /// Reschedule check invoked when the preemption count drops to zero.
    fn preempt_schedule(&self);

    /// Run `func` once on every CPU in `mask`.
    ///
    /// With `wait` set, return only after every target has finished `func`.
    /// The caller never includes itself in `mask`.
    fn call_function_many(&self, mask: &CpuMask, func: &(dyn Fn() + Sync), wait: bool);

    // ------------------------------------------------------------------
    // CPU instructions (native defaults)
    // ------------------------------------------------------------------

    fn irqs_disabled(&self) -> bool {
        arch::irqs_disabled()
    }

    fn local_irq_save(&self) -> IrqFlags {
        arch::local_irq_save()
    }

    fn local_irq_restore(&self, flags: IrqFlags) {
        arch::local_irq_restore(flags)
    }

    fn read_cr3(&self) -> u64 {
        arch::read_cr3()
    }

    /// Make `root` the active page table on this CPU.
    fn load_cr3(&self, root: PageTableRoot) {
        // SAFETY: a PageTableRoot is only built by the paging subsystem for
        // fully populated top-level tables that share the kernel half.
        unsafe { arch::write_cr3(root.as_u64()) }
    }

    fn flush_tlb_local(&self) {
        arch::flush_tlb_local()
    }

    fn flush_tlb_single(&self, addr: u64) {
        arch::flush_tlb_single(addr)
    }

    /// # Safety
    /// `msr` must exist on this CPU.
    unsafe fn read_msr(&self, msr: u32) -> u64 {
        arch::rdmsr(msr)
    }

    /// # Safety
    /// `msr` must exist and accept `value`.
    unsafe fn write_msr(&self, msr: u32, value: u64) {
        arch::wrmsr(msr, value)
    }

    fn cpuid_features(&self) -> CpuFeatures {
        arch::cpuid_features()
    }

    fn udelay(&self, us: u64) {
        arch::udelay(us)
    }
}

/// Stand-in used before the kernel installs its platform.
struct BootPlatform;

impl Platform for BootPlatform {
    fn cpu_id(&self) -> CpuId {
        0
    }

    fn nr_cpus(&self) -> usize {
        1
    }

    fn current_mm(&self) -> Option<&'static AddressSpace> {
        None
    }

    fn preempt_schedule(&self) {}

    fn call_function_many(&self, mask: &CpuMask, _func: &(dyn Fn() + Sync), _wait: bool) {
        if !mask.is_empty() {
            crate::kwarn!("platform: cross-CPU call to {:?} before SMP bring-up", mask);
        }
    }
}

static BOOT_PLATFORM: BootPlatform = BootPlatform;
static PLATFORM: Once<&'static dyn Platform> = Once::new();

/// Install the kernel's platform hooks. Only the first call takes effect.
pub fn install(platform: &'static dyn Platform) -> Result<(), &'static str> {
    let mut fresh = false;
    PLATFORM.call_once(|| {
        fresh = true;
        platform
    });
    if fresh {
        Ok(())
    } else {
        Err("platform hooks already installed")
    }
}

pub fn is_installed() -> bool {
    PLATFORM.is_completed()
}

/// The installed platform, or the boot stand-in.
#[inline]
pub fn get() -> &'static dyn Platform {
    match PLATFORM.get() {
        Some(platform) => *platform,
        None => &BOOT_PLATFORM,
    }
}

/// Logical id of the calling CPU.
#[inline]
pub fn cpu_id() -> CpuId {
    get().cpu_id()
}
