//! Interrupt Command Register encoding
//!
//! The low ICR dword selects vector, delivery mode, destination mode, level,
//! trigger and destination shorthand. Writing it sends the IPI. The
//! destination itself lives in the high dword (xAPIC) or the upper half of
//! the 64-bit ICR MSR (x2APIC) and is encoded by the driver.

use super::regs::field;

pub const APIC_VECTOR_MASK: u32 = 0x0000_00FF;

pub const APIC_DM_FIXED: u32 = 0x0000_0000;
pub const APIC_DM_LOWEST: u32 = 0x0000_0100;
pub const APIC_DM_SMI: u32 = 0x0000_0200;
pub const APIC_DM_NMI: u32 = 0x0000_0400;
pub const APIC_DM_INIT: u32 = 0x0000_0500;
pub const APIC_DM_STARTUP: u32 = 0x0000_0600;
pub const APIC_DM_EXTINT: u32 = 0x0000_0700;

pub const APIC_DEST_LOGICAL: u32 = 0x0000_0800;
pub const APIC_ICR_BUSY: u32 = 0x0000_1000;
pub const APIC_INT_ASSERT: u32 = 0x0000_4000;
pub const APIC_INT_LEVELTRIG: u32 = 0x0000_8000;

pub const APIC_DEST_SELF: u32 = 0x0004_0000;
pub const APIC_DEST_ALLINC: u32 = 0x0008_0000;
pub const APIC_DEST_ALLBUT: u32 = 0x000C_0000;

/// Interrupt delivery mode (ICR bits 8..11).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DeliveryMode {
    Fixed = 0,
    LowestPrio = 1,
    Smi = 2,
    Nmi = 4,
    Init = 5,
    StartUp = 6,
    ExtInt = 7,
}

impl DeliveryMode {
    pub const fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(DeliveryMode::Fixed),
            1 => Some(DeliveryMode::LowestPrio),
            2 => Some(DeliveryMode::Smi),
            4 => Some(DeliveryMode::Nmi),
            5 => Some(DeliveryMode::Init),
            6 => Some(DeliveryMode::StartUp),
            7 => Some(DeliveryMode::ExtInt),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DestMode {
    Physical,
    Logical,
}

/// Destination shorthand (ICR bits 18..20).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Shorthand {
    None = 0,
    Myself = 1,
    AllIncludingSelf = 2,
    AllExcludingSelf = 3,
}

impl Shorthand {
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            1 => Shorthand::Myself,
            2 => Shorthand::AllIncludingSelf,
            3 => Shorthand::AllExcludingSelf,
            _ => Shorthand::None,
        }
    }
}

/// A decoded low ICR dword.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IcrCommand {
    pub vector: u8,
    pub delivery_mode: DeliveryMode,
    pub dest_mode: DestMode,
    pub level_assert: bool,
    pub level_triggered: bool,
    pub shorthand: Shorthand,
}

impl IcrCommand {
    /// Edge-triggered fixed IPI with `vector` to an explicit destination.
    pub const fn fixed(vector: u8) -> Self {
        Self {
            vector,
            delivery_mode: DeliveryMode::Fixed,
            dest_mode: DestMode::Physical,
            level_assert: false,
            level_triggered: false,
            shorthand: Shorthand::None,
        }
    }

    pub const fn init_assert() -> Self {
        Self {
            vector: 0,
            delivery_mode: DeliveryMode::Init,
            dest_mode: DestMode::Physical,
            level_assert: true,
            level_triggered: true,
            shorthand: Shorthand::None,
        }
    }

    pub const fn init_deassert() -> Self {
        Self {
            level_assert: false,
            ..Self::init_assert()
        }
    }

    /// STARTUP IPI; the target begins executing at `vector << 12`.
    pub const fn startup(vector: u8) -> Self {
        Self {
            vector,
            delivery_mode: DeliveryMode::StartUp,
            ..Self::fixed(0)
        }
    }

    pub const fn with_shorthand(self, shorthand: Shorthand) -> Self {
        Self { shorthand, ..self }
    }

    pub const fn with_dest_mode(self, dest_mode: DestMode) -> Self {
        Self { dest_mode, ..self }
    }

    pub const fn to_low(self) -> u32 {
        let mut low = self.vector as u32;
        low |= (self.delivery_mode as u32) << 8;
        if matches!(self.dest_mode, DestMode::Logical) {
            low |= APIC_DEST_LOGICAL;
        }
        if self.level_assert {
            low |= APIC_INT_ASSERT;
        }
        if self.level_triggered {
            low |= APIC_INT_LEVELTRIG;
        }
        low | ((self.shorthand as u32) << 18)
    }

    /// Decode a low ICR dword. Reserved delivery modes yield `None`.
    pub fn from_low(low: u32) -> Option<Self> {
        Some(Self {
            vector: field::ICR1_VECTOR.extract(low) as u8,
            delivery_mode: DeliveryMode::from_bits(field::ICR1_DELIVERY_MODE.extract(low))?,
            dest_mode: if field::ICR1_DESTINATION_MODE.extract(low) != 0 {
                DestMode::Logical
            } else {
                DestMode::Physical
            },
            level_assert: field::ICR1_LEVEL.extract(low) != 0,
            level_triggered: field::ICR1_TRIGGER.extract(low) != 0,
            shorthand: Shorthand::from_bits(field::ICR1_SHORTHAND.extract(low)),
        })
    }
}

/// Delivery-status bit of a low ICR dword.
#[inline]
pub const fn icr_busy(low: u32) -> bool {
    low & APIC_ICR_BUSY != 0
}
