//! IPI dispatch
//!
//! Builds every send variant out of the two driver primitives,
//! `wait_icr_idle` and `icr_write`. Each send runs with preemption disabled
//! and local interrupts saved, so the ICR is written by one context at a
//! time and the "self" CPU cannot change under the sender.

use crate::percpu::{CpuId, CpuMask};
use crate::platform;
use crate::preempt::PreemptGuard;

use super::icr::{IcrCommand, Shorthand};
use super::{cpu_physical_id, ApicDriver, ApicError};

/// Largest real-mode start address a STARTUP IPI can encode.
const STARTUP_LIMIT: u64 = 0x10_0000;
const STARTUP_ALIGN: u64 = 0x1000;

const INIT_ASSERT_DELAY_US: u64 = 10_000;
const STARTUP_SETTLE_DELAY_US: u64 = 300;
const STARTUP_GAP_DELAY_US: u64 = 200;
const STARTUP_IPI_COUNT: usize = 2;

/// Run `f` pinned to the current CPU with interrupts off.
fn with_icr_locked<R>(f: impl FnOnce(CpuId) -> R) -> R {
    let guard = PreemptGuard::new();
    let p = platform::get();
    let flags = p.local_irq_save();
    let ret = f(guard.cpu());
    p.local_irq_restore(flags);
    drop(guard);
    ret
}

fn send_dest<A: ApicDriver + ?Sized>(apic: &A, cmd: IcrCommand, apicid: u32) {
    apic.wait_icr_idle();
    apic.icr_write(cmd.with_dest_mode(apic.irq_dest_mode()).to_low(), apicid);
}

fn send_shortcut<A: ApicDriver + ?Sized>(apic: &A, shorthand: Shorthand, vector: u8) {
    apic.wait_icr_idle();
    let cmd = IcrCommand::fixed(vector)
        .with_dest_mode(apic.irq_dest_mode())
        .with_shorthand(shorthand);
    apic.icr_write(cmd.to_low(), 0);
}

/// Send to every CPU in `mask` except `skip`, one ICR write per target.
fn send_each<A: ApicDriver + ?Sized>(apic: &A, mask: &CpuMask, skip: Option<CpuId>, vector: u8) {
    for cpu in mask.iter().filter(|&cpu| Some(cpu) != skip) {
        match cpu_physical_id(cpu).filter(|&apicid| apic.apic_id_valid(apicid)) {
            Some(apicid) => send_dest(apic, IcrCommand::fixed(vector), apicid),
            None => crate::kwarn!(
                "IPI: CPU {} has no usable APIC id, vector {:#x} dropped",
                cpu,
                vector
            ),
        }
    }
}

pub fn send_ipi<A: ApicDriver + ?Sized>(apic: &A, cpu: CpuId, vector: u8) {
    with_icr_locked(|_| send_each(apic, &CpuMask::single(cpu), None, vector));
}

pub fn send_ipi_mask<A: ApicDriver + ?Sized>(apic: &A, mask: &CpuMask, vector: u8) {
    with_icr_locked(|_| send_each(apic, mask, None, vector));
}

pub fn send_ipi_mask_allbutself<A: ApicDriver + ?Sized>(apic: &A, mask: &CpuMask, vector: u8) {
    with_icr_locked(|this_cpu| send_each(apic, mask, Some(this_cpu), vector));
}

pub fn send_ipi_allbutself<A: ApicDriver + ?Sized>(apic: &A, vector: u8) {
    if platform::get().nr_cpus() <= 1 {
        return;
    }
    with_icr_locked(|_| send_shortcut(apic, Shorthand::AllExcludingSelf, vector));
}

pub fn send_ipi_all<A: ApicDriver + ?Sized>(apic: &A, vector: u8) {
    with_icr_locked(|_| send_shortcut(apic, Shorthand::AllIncludingSelf, vector));
}

pub fn send_ipi_self<A: ApicDriver + ?Sized>(apic: &A, vector: u8) {
    with_icr_locked(|_| send_shortcut(apic, Shorthand::Myself, vector));
}

/// INIT-SIPI-SIPI wakeup of the CPU with APIC id `apicid`.
///
/// `start_eip` is the physical address of the real-mode trampoline.
/// Preemption stays off for the whole sequence; interrupts stay on so the
/// INIT delay does not run masked.
pub fn wakeup_secondary_cpu<A: ApicDriver + ?Sized>(
    apic: &A,
    apicid: u32,
    start_eip: u64,
) -> Result<(), ApicError> {
    if start_eip >= STARTUP_LIMIT || start_eip % STARTUP_ALIGN != 0 {
        return Err(ApicError::InvalidStartAddress);
    }
    if !apic.apic_id_valid(apicid) {
        return Err(ApicError::InvalidApicId);
    }
    let vector = (start_eip >> 12) as u8;
    let p = platform::get();
    let _guard = PreemptGuard::new();

    crate::kdebug!("SMP: waking APIC {:#x} at {:#x}", apicid, start_eip);

    // A send issued just before us may still be in flight.
    apic.safe_wait_icr_idle()?;
    apic.icr_write(IcrCommand::init_assert().to_low(), apicid);
    apic.safe_wait_icr_idle()?;
    p.udelay(INIT_ASSERT_DELAY_US);

    // x2APIC drops level-triggered INIT de-assert.
    if apic.init_deassert() {
        apic.icr_write(IcrCommand::init_deassert().to_low(), apicid);
        apic.safe_wait_icr_idle()?;
    }

    for _ in 0..STARTUP_IPI_COUNT {
        apic.icr_write(IcrCommand::startup(vector).to_low(), apicid);
        p.udelay(STARTUP_SETTLE_DELAY_US);
        apic.safe_wait_icr_idle()?;
        p.udelay(STARTUP_GAP_DELAY_US);
    }

    Ok(())
}
