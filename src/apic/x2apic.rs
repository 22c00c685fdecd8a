//! x2APIC driver, physical destination mode
//!
//! Every register is an MSR. The ICR is a single 64-bit write that carries
//! the full 32-bit destination, and there is no delivery-status bit to poll.

use core::sync::atomic::{fence, Ordering};

use crate::platform;

use super::icr::{DeliveryMode, DestMode};
use super::regs::{x2apic_msr, APIC_DFR, APIC_EOI, APIC_EOI_ACK, APIC_ICR, APIC_ID, APIC_LDR, APIC_LVR};
use super::{x2apic_mode, ApicDriver, ApicError};

pub struct X2ApicPhys;

pub static X2APIC_PHYS: X2ApicPhys = X2ApicPhys;

impl ApicDriver for X2ApicPhys {
    fn name(&self) -> &'static str {
        "physical x2apic"
    }

    /// Only selected once `check_x2apic` has latched x2APIC mode.
    fn probe(&self) -> bool {
        x2apic_mode()
    }

    fn read(&self, reg: u32) -> u32 {
        if reg == APIC_DFR {
            return u32::MAX;
        }
        // SAFETY: probe() only succeeds with x2APIC mode enabled, where the
        // whole 0x800 MSR range exists.
        unsafe { platform::get().read_msr(x2apic_msr(reg)) as u32 }
    }

    fn write(&self, reg: u32, value: u32) {
        if matches!(reg, APIC_DFR | APIC_ID | APIC_LDR | APIC_LVR) {
            return;
        }
        // SAFETY: see `read`.
        unsafe { platform::get().write_msr(x2apic_msr(reg), value as u64) }
    }

    fn eoi_write(&self, _reg: u32, _value: u32) {
        // SAFETY: see `read`.
        unsafe { platform::get().write_msr(x2apic_msr(APIC_EOI), APIC_EOI_ACK as u64) }
    }

    fn icr_read(&self) -> u64 {
        // SAFETY: see `read`.
        unsafe { platform::get().read_msr(x2apic_msr(APIC_ICR)) }
    }

    fn icr_write(&self, low: u32, dest: u32) {
        // x2APIC MSR writes are not serializing: stores made before the IPI
        // must be globally visible before the target can observe it.
        fence(Ordering::SeqCst);
        let value = ((dest as u64) << 32) | low as u64;
        // SAFETY: see `read`.
        unsafe { platform::get().write_msr(x2apic_msr(APIC_ICR), value) }
    }

    fn wait_icr_idle(&self) {}

    fn safe_wait_icr_idle(&self) -> Result<(), ApicError> {
        Ok(())
    }

    fn get_apic_id(&self, raw: u32) -> u32 {
        raw
    }

    fn set_apic_id(&self, id: u32) -> u32 {
        id
    }

    fn apic_id_valid(&self, id: u32) -> bool {
        id != u32::MAX
    }

    fn irq_delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Fixed
    }

    fn irq_dest_mode(&self) -> DestMode {
        DestMode::Physical
    }

    fn init_deassert(&self) -> bool {
        false
    }
}
