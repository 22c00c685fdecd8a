//! Memory-mapped xAPIC driver

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config;
use crate::platform;

use super::icr::{icr_busy, DeliveryMode, DestMode};
use super::regs::{field, APIC_DEFAULT_PHYS_BASE, APIC_ICR, APIC_ICR2};
use super::{ApicDriver, ApicError};

static MMIO_BASE: AtomicU64 = AtomicU64::new(APIC_DEFAULT_PHYS_BASE);

/// Point the driver at the virtual address the register page is mapped at.
pub(super) fn set_mmio_base(base: u64) {
    MMIO_BASE.store(base, Ordering::SeqCst);
}

pub(super) fn mmio_base() -> u64 {
    MMIO_BASE.load(Ordering::SeqCst)
}

pub struct XApic;

pub static XAPIC: XApic = XApic;

impl XApic {
    #[inline]
    fn reg_ptr(reg: u32) -> *mut u32 {
        (mmio_base() + reg as u64) as *mut u32
    }

    #[inline]
    fn icr_idle(&self) -> bool {
        !icr_busy(self.read(APIC_ICR))
    }
}

impl ApicDriver for XApic {
    fn name(&self) -> &'static str {
        "xapic"
    }

    fn probe(&self) -> bool {
        platform::get().cpuid_features().apic
    }

    fn read(&self, reg: u32) -> u32 {
        // SAFETY: the register page is mapped uncached at MMIO_BASE by
        // init_apic_mappings and `reg` is an architected offset.
        unsafe { read_volatile(Self::reg_ptr(reg)) }
    }

    fn write(&self, reg: u32, value: u32) {
        // SAFETY: see `read`.
        unsafe { write_volatile(Self::reg_ptr(reg), value) }
    }

    fn icr_read(&self) -> u64 {
        let low = self.read(APIC_ICR) as u64;
        let high = self.read(APIC_ICR2) as u64;
        (high << 32) | low
    }

    fn icr_write(&self, low: u32, dest: u32) {
        // The low half sends, so the destination goes in first.
        self.write(APIC_ICR2, self.set_apic_id(dest));
        self.write(APIC_ICR, low);
    }

    fn wait_icr_idle(&self) {
        while !self.icr_idle() {
            core::hint::spin_loop();
        }
    }

    fn safe_wait_icr_idle(&self) -> Result<(), ApicError> {
        let retries = config::icr_wait_retries();
        let delay = config::icr_retry_delay_us() as u64;
        let p = platform::get();

        let mut polls = 0;
        loop {
            if self.icr_idle() {
                return Ok(());
            }
            if polls >= retries {
                return Err(ApicError::IcrTimeout);
            }
            p.udelay(delay);
            polls += 1;
        }
    }

    fn get_apic_id(&self, raw: u32) -> u32 {
        field::ID_XAPIC_ID.extract(raw)
    }

    fn set_apic_id(&self, id: u32) -> u32 {
        field::ID_XAPIC_ID.insert(0, id)
    }

    fn apic_id_valid(&self, id: u32) -> bool {
        id < 0xFF
    }

    fn irq_delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Fixed
    }

    fn irq_dest_mode(&self) -> DestMode {
        DestMode::Physical
    }
}
