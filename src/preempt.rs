//! Per-CPU preemption counter
//!
//! Each CPU carries a nesting counter. While it is non-zero the scheduler
//! must not preempt the running context on that CPU; when an enable brings
//! it back to exactly zero, a pending reschedule gets its chance to run.
//!
//! The boot CPU starts at [`INIT_PREEMPT_COUNT`] so that nothing can be
//! scheduled before the scheduler exists. `sched_init` clears it through
//! [`init_idle_preempt_count`] once the idle task is set up.
//!
//! Prefer [`PreemptGuard`] over bare [`preempt_disable`]/[`preempt_enable`]
//! pairs: the guard cannot be leaked across a return path, and it is the
//! only way to reach [`PerCpu`] slots.
//!
//! [`PerCpu`]: crate::percpu::PerCpu

use core::marker::PhantomData;
use core::sync::atomic::{compiler_fence, AtomicI32, Ordering};

use crate::percpu::{CpuId, PerCpu, MAX_CPUS};
use crate::platform;

/// Counter value of the boot CPU until the scheduler is running.
pub const INIT_PREEMPT_COUNT: i32 = 1;

/// Counter value meaning "preemptible".
pub const PREEMPT_ENABLED: i32 = 0;

const BOOT_CPU: CpuId = 0;

static PREEMPT_COUNT: PerCpu<AtomicI32> = PerCpu::from_array(boot_preempt_counts());

const fn boot_preempt_counts() -> [AtomicI32; MAX_CPUS] {
    let mut counts = [const { AtomicI32::new(PREEMPT_ENABLED) }; MAX_CPUS];
    counts[BOOT_CPU as usize] = AtomicI32::new(INIT_PREEMPT_COUNT);
    counts
}

#[inline]
fn this_cpu_count() -> &'static AtomicI32 {
    PREEMPT_COUNT.slot(platform::cpu_id())
}

/// Current nesting depth on the calling CPU.
#[inline]
pub fn preempt_count() -> i32 {
    this_cpu_count().load(Ordering::Relaxed)
}

/// Raise the calling CPU's counter by `val`.
///
/// The CPU id lookup and the increment happen with interrupts masked, so the
/// caller cannot migrate between the two.
#[inline]
pub fn preempt_count_add(val: i32) {
    let p = platform::get();
    let flags = p.local_irq_save();
    PREEMPT_COUNT
        .slot(p.cpu_id())
        .fetch_add(val, Ordering::Relaxed);
    p.local_irq_restore(flags);
}

/// Lower the calling CPU's counter by `val`.
#[inline]
pub fn preempt_count_sub(val: i32) {
    this_cpu_count().fetch_sub(val, Ordering::Relaxed);
}

/// Decrement and report whether the counter reached zero.
#[inline]
fn preempt_count_dec_and_test() -> bool {
    this_cpu_count().fetch_sub(1, Ordering::Relaxed) == 1
}

/// Reset `cpu`'s counter once its idle task exists.
pub fn init_idle_preempt_count(cpu: CpuId) {
    if let Some(count) = PREEMPT_COUNT.for_cpu(cpu) {
        count.store(PREEMPT_ENABLED, Ordering::Relaxed);
    }
}

#[cfg(feature = "preempt")]
mod imp {
    use super::*;

    #[inline]
    pub fn preempt_disable() {
        preempt_count_add(1);
        compiler_fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn preempt_enable() {
        compiler_fence(Ordering::SeqCst);
        if preempt_count_dec_and_test() {
            platform::get().preempt_schedule();
        }
    }

    #[inline]
    pub fn preempt_enable_no_resched() {
        compiler_fence(Ordering::SeqCst);
        preempt_count_sub(1);
    }

    #[inline]
    pub fn preemptible() -> bool {
        preempt_count() == 0 && !platform::get().irqs_disabled()
    }
}

#[cfg(not(feature = "preempt"))]
mod imp {
    use super::*;

    #[inline]
    pub fn preempt_disable() {
        compiler_fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn preempt_enable() {
        compiler_fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn preempt_enable_no_resched() {
        compiler_fence(Ordering::SeqCst);
    }

    #[inline]
    pub fn preemptible() -> bool {
        false
    }
}

pub use imp::{preempt_disable, preempt_enable, preempt_enable_no_resched, preemptible};

// ============================================================================
// PreemptGuard
// ============================================================================

/// Preemption stays disabled on this CPU for the guard's lifetime.
///
/// Guards nest. The guard is `!Send`: it must be dropped on the CPU that
/// created it.
#[must_use = "dropping a PreemptGuard immediately re-enables preemption"]
pub struct PreemptGuard {
    cpu: CpuId,
    _not_send: PhantomData<*mut ()>,
}

impl PreemptGuard {
    #[inline]
    pub fn new() -> Self {
        preempt_disable();
        Self {
            cpu: platform::cpu_id(),
            _not_send: PhantomData,
        }
    }

    /// The CPU this context is pinned to.
    #[inline]
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    /// Leave the scope without the reschedule check.
    pub fn release_no_resched(self) {
        core::mem::forget(self);
        preempt_enable_no_resched();
    }
}

impl Default for PreemptGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PreemptGuard {
    #[inline]
    fn drop(&mut self) {
        preempt_enable();
    }
}
