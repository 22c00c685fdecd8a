//! Local APIC register page
//!
//! The architected registers sit in 16-byte slots of a 1 KiB page. The xAPIC
//! driver reaches them through MMIO at these offsets; in x2APIC mode the same
//! register is MSR `0x800 + (offset >> 4)`.
//!
//! Bit fields are described by [`RegField`] instead of native bit-field
//! structs. [`LocalApicRegs`] is a plain byte image of the page, used to
//! snapshot or emulate a controller.

// ============================================================================
// Register offsets
// ============================================================================

pub const APIC_ID: u32 = 0x020;
pub const APIC_LVR: u32 = 0x030;
pub const APIC_TASKPRI: u32 = 0x080;
pub const APIC_ARBPRI: u32 = 0x090;
pub const APIC_PROCPRI: u32 = 0x0A0;
pub const APIC_EOI: u32 = 0x0B0;
pub const APIC_LDR: u32 = 0x0D0;
pub const APIC_DFR: u32 = 0x0E0;
pub const APIC_SPIV: u32 = 0x0F0;
pub const APIC_ISR: u32 = 0x100;
pub const APIC_TMR: u32 = 0x180;
pub const APIC_IRR: u32 = 0x200;
pub const APIC_ESR: u32 = 0x280;
pub const APIC_ICR: u32 = 0x300;
pub const APIC_ICR2: u32 = 0x310;
pub const APIC_LVTT: u32 = 0x320;
pub const APIC_LVTTHMR: u32 = 0x330;
pub const APIC_LVTPC: u32 = 0x340;
pub const APIC_LVT0: u32 = 0x350;
pub const APIC_LVT1: u32 = 0x360;
pub const APIC_LVTERR: u32 = 0x370;
pub const APIC_TMICT: u32 = 0x380;
pub const APIC_TMCCT: u32 = 0x390;
pub const APIC_TDCR: u32 = 0x3E0;

/// Size of the register page image.
pub const APIC_REGS_SIZE: usize = 0x400;

/// Value written to the EOI register to acknowledge the in-service vector.
pub const APIC_EOI_ACK: u32 = 0;

/// Sentinel for "no APIC id" in the CPU to APIC id map.
pub const BAD_APICID: u32 = 0xFFFF;

/// Default physical base of the xAPIC page.
pub const APIC_DEFAULT_PHYS_BASE: u64 = 0xFEE0_0000;

// ============================================================================
// MSRs
// ============================================================================

pub const MSR_IA32_APICBASE: u32 = 0x1B;
pub const MSR_IA32_APICBASE_ENABLE: u64 = 1 << 11;
/// IA32_APIC_BASE[10]: x2APIC mode enabled.
pub const X2APIC_ENABLE: u64 = 1 << 10;
pub const MSR_IA32_APICBASE_BASE: u64 = 0xFFFF_F000;

/// First x2APIC MSR; register `reg` lives at `APIC_BASE_MSR + (reg >> 4)`.
pub const APIC_BASE_MSR: u32 = 0x800;

#[inline]
pub const fn x2apic_msr(reg: u32) -> u32 {
    APIC_BASE_MSR + (reg >> 4)
}

// ============================================================================
// Bit fields
// ============================================================================

/// One bit field within a 32-bit register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegField {
    pub offset: u32,
    pub shift: u8,
    pub width: u8,
}

impl RegField {
    pub const fn new(offset: u32, shift: u8, width: u8) -> Self {
        Self {
            offset,
            shift,
            width,
        }
    }

    /// Mask of the field in register position.
    pub const fn mask(self) -> u32 {
        let bits = if self.width >= 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        };
        bits << self.shift
    }

    pub const fn extract(self, raw: u32) -> u32 {
        (raw & self.mask()) >> self.shift
    }

    /// `raw` with the field replaced by `value`; excess bits are dropped.
    pub const fn insert(self, raw: u32, value: u32) -> u32 {
        (raw & !self.mask()) | ((value << self.shift) & self.mask())
    }
}

/// Field descriptors for every architected register.
pub mod field {
    use super::*;

    pub const ID_PHYS_APIC_ID: RegField = RegField::new(APIC_ID, 24, 4);
    pub const ID_XAPIC_ID: RegField = RegField::new(APIC_ID, 24, 8);

    pub const LVR_VERSION: RegField = RegField::new(APIC_LVR, 0, 8);
    pub const LVR_MAX_LVT: RegField = RegField::new(APIC_LVR, 16, 8);

    pub const TPR_PRIORITY: RegField = RegField::new(APIC_TASKPRI, 0, 8);
    pub const APR_PRIORITY: RegField = RegField::new(APIC_ARBPRI, 0, 8);
    pub const PPR_PRIORITY: RegField = RegField::new(APIC_PROCPRI, 0, 8);

    pub const EOI: RegField = RegField::new(APIC_EOI, 0, 32);

    pub const LDR_LOGICAL_DEST: RegField = RegField::new(APIC_LDR, 24, 8);
    pub const DFR_MODEL: RegField = RegField::new(APIC_DFR, 28, 4);

    pub const SVR_SPURIOUS_VECTOR: RegField = RegField::new(APIC_SPIV, 0, 8);
    pub const SVR_APIC_ENABLED: RegField = RegField::new(APIC_SPIV, 8, 1);
    pub const SVR_FOCUS_CPU: RegField = RegField::new(APIC_SPIV, 9, 1);

    pub const ESR_SEND_CS: RegField = RegField::new(APIC_ESR, 0, 1);
    pub const ESR_RECEIVE_CS: RegField = RegField::new(APIC_ESR, 1, 1);
    pub const ESR_SEND_ACCEPT: RegField = RegField::new(APIC_ESR, 2, 1);
    pub const ESR_RECEIVE_ACCEPT: RegField = RegField::new(APIC_ESR, 3, 1);
    pub const ESR_SEND_ILLEGAL_VECTOR: RegField = RegField::new(APIC_ESR, 5, 1);
    pub const ESR_RECEIVE_ILLEGAL_VECTOR: RegField = RegField::new(APIC_ESR, 6, 1);
    pub const ESR_ILLEGAL_REGISTER_ADDRESS: RegField = RegField::new(APIC_ESR, 7, 1);
    pub const ESR_ALL_ERRORS: RegField = RegField::new(APIC_ESR, 0, 32);

    pub const ICR1_VECTOR: RegField = RegField::new(APIC_ICR, 0, 8);
    pub const ICR1_DELIVERY_MODE: RegField = RegField::new(APIC_ICR, 8, 3);
    pub const ICR1_DESTINATION_MODE: RegField = RegField::new(APIC_ICR, 11, 1);
    pub const ICR1_DELIVERY_STATUS: RegField = RegField::new(APIC_ICR, 12, 1);
    pub const ICR1_LEVEL: RegField = RegField::new(APIC_ICR, 14, 1);
    pub const ICR1_TRIGGER: RegField = RegField::new(APIC_ICR, 15, 1);
    pub const ICR1_SHORTHAND: RegField = RegField::new(APIC_ICR, 18, 2);

    pub const ICR2_PHYS_DEST: RegField = RegField::new(APIC_ICR2, 24, 4);
    pub const ICR2_LOGICAL_DEST: RegField = RegField::new(APIC_ICR2, 24, 8);

    pub const LVTT_VECTOR: RegField = RegField::new(APIC_LVTT, 0, 8);
    pub const LVTT_DELIVERY_STATUS: RegField = RegField::new(APIC_LVTT, 12, 1);
    pub const LVTT_MASK: RegField = RegField::new(APIC_LVTT, 16, 1);
    pub const LVTT_TIMER_MODE: RegField = RegField::new(APIC_LVTT, 17, 1);

    pub const LVTTHMR_VECTOR: RegField = RegField::new(APIC_LVTTHMR, 0, 8);
    pub const LVTTHMR_DELIVERY_MODE: RegField = RegField::new(APIC_LVTTHMR, 8, 3);
    pub const LVTTHMR_DELIVERY_STATUS: RegField = RegField::new(APIC_LVTTHMR, 12, 1);
    pub const LVTTHMR_MASK: RegField = RegField::new(APIC_LVTTHMR, 16, 1);

    pub const LVTPC_VECTOR: RegField = RegField::new(APIC_LVTPC, 0, 8);
    pub const LVTPC_DELIVERY_MODE: RegField = RegField::new(APIC_LVTPC, 8, 3);
    pub const LVTPC_DELIVERY_STATUS: RegField = RegField::new(APIC_LVTPC, 12, 1);
    pub const LVTPC_MASK: RegField = RegField::new(APIC_LVTPC, 16, 1);

    pub const LVTERR_VECTOR: RegField = RegField::new(APIC_LVTERR, 0, 8);
    pub const LVTERR_DELIVERY_STATUS: RegField = RegField::new(APIC_LVTERR, 12, 1);
    pub const LVTERR_MASK: RegField = RegField::new(APIC_LVTERR, 16, 1);

    pub const TMICT_INITIAL_COUNT: RegField = RegField::new(APIC_TMICT, 0, 32);
    pub const TMCCT_CURRENT_COUNT: RegField = RegField::new(APIC_TMCCT, 0, 32);
    pub const TDCR_DIVISOR: RegField = RegField::new(APIC_TDCR, 0, 4);

    /// LINT0 and LINT1 share one layout.
    pub const fn lint_vector(lvt: u32) -> RegField {
        RegField::new(lvt, 0, 8)
    }
    pub const fn lint_delivery_mode(lvt: u32) -> RegField {
        RegField::new(lvt, 8, 3)
    }
    pub const fn lint_delivery_status(lvt: u32) -> RegField {
        RegField::new(lvt, 12, 1)
    }
    pub const fn lint_polarity(lvt: u32) -> RegField {
        RegField::new(lvt, 13, 1)
    }
    pub const fn lint_remote_irr(lvt: u32) -> RegField {
        RegField::new(lvt, 14, 1)
    }
    pub const fn lint_trigger(lvt: u32) -> RegField {
        RegField::new(lvt, 15, 1)
    }
    pub const fn lint_mask(lvt: u32) -> RegField {
        RegField::new(lvt, 16, 1)
    }

    /// Word `n` (0..8) of the 256-bit ISR.
    pub const fn isr(n: u32) -> RegField {
        RegField::new(APIC_ISR + n * 0x10, 0, 32)
    }
    pub const fn tmr(n: u32) -> RegField {
        RegField::new(APIC_TMR + n * 0x10, 0, 32)
    }
    pub const fn irr(n: u32) -> RegField {
        RegField::new(APIC_IRR + n * 0x10, 0, 32)
    }
}

// ============================================================================
// Register page image
// ============================================================================

/// Byte image of the local APIC register page.
///
/// Only the first dword of each 16-byte slot carries data; the rest is
/// reserved and left as found.
#[repr(C, align(16))]
pub struct LocalApicRegs {
    bytes: [u8; APIC_REGS_SIZE],
}

impl LocalApicRegs {
    pub const fn new() -> Self {
        Self {
            bytes: [0; APIC_REGS_SIZE],
        }
    }

    /// Read the dword at `reg`, or `None` for an offset outside the page.
    pub fn read(&self, reg: u32) -> Option<u32> {
        let start = reg as usize;
        let raw = self.bytes.get(start..start.checked_add(4)?)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Write the dword at `reg`; offsets outside the page are ignored.
    pub fn write(&mut self, reg: u32, value: u32) {
        let start = reg as usize;
        if let Some(raw) = start
            .checked_add(4)
            .and_then(|end| self.bytes.get_mut(start..end))
        {
            raw.copy_from_slice(&value.to_le_bytes());
        }
    }

    pub fn get(&self, field: RegField) -> u32 {
        self.read(field.offset)
            .map(|raw| field.extract(raw))
            .unwrap_or(0)
    }

    pub fn set(&mut self, field: RegField, value: u32) {
        if let Some(raw) = self.read(field.offset) {
            self.write(field.offset, field.insert(raw, value));
        }
    }

    /// Base address of the image, usable as an xAPIC MMIO base.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }
}

impl Default for LocalApicRegs {
    fn default() -> Self {
        Self::new()
    }
}
