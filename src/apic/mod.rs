//! Local APIC driver interface
//!
//! Exactly one [`ApicDriver`] serves the kernel. Candidates are registered
//! in priority order during early boot; [`setup_apic_driver`] probes them in
//! that order, keeps the first that answers, and never changes its mind.
//!
//! The `apic_*` free functions forward to the active driver. Before a driver
//! has been selected they reach a no-op controller, so early boot code can
//! call them without checking.

pub mod icr;
pub mod ipi;
pub mod regs;
pub mod x2apic;
pub mod xapic;

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, Once};

use crate::percpu::{CpuId, CpuMask, PerCpu, MAX_CPUS};
use crate::platform;

pub use icr::{DeliveryMode, DestMode, IcrCommand, Shorthand};
pub use regs::{APIC_EOI, APIC_EOI_ACK, APIC_ID, BAD_APICID};

// ============================================================================
// Errors
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApicError {
    /// The ICR delivery-status bit did not clear within the retry budget.
    IcrTimeout,
    /// STARTUP target not page aligned or above 1 MiB.
    InvalidStartAddress,
    /// Wakeup target id the active driver cannot address.
    InvalidApicId,
    RegistryFull,
    NoDriver,
}

impl fmt::Display for ApicError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApicError::IcrTimeout => write!(f, "ICR delivery timed out"),
            ApicError::InvalidStartAddress => write!(f, "invalid STARTUP address"),
            ApicError::InvalidApicId => write!(f, "invalid APIC id"),
            ApicError::RegistryFull => write!(f, "APIC driver registry full"),
            ApicError::NoDriver => write!(f, "no APIC driver found"),
        }
    }
}

// ============================================================================
// Driver trait
// ============================================================================

pub trait ApicDriver: Sync {
    fn name(&self) -> &'static str;

    /// Is this controller present and usable? Must not touch hardware state.
    fn probe(&self) -> bool;

    fn read(&self, reg: u32) -> u32;
    fn write(&self, reg: u32, value: u32);

    fn eoi_write(&self, reg: u32, value: u32) {
        self.write(reg, value);
    }

    fn icr_read(&self) -> u64;

    /// Write the ICR; `dest` is an APIC id, placed by the driver.
    fn icr_write(&self, low: u32, dest: u32);

    /// Spin until the previous IPI has been accepted.
    fn wait_icr_idle(&self);

    /// Bounded [`ApicDriver::wait_icr_idle`].
    fn safe_wait_icr_idle(&self) -> Result<(), ApicError>;

    /// APIC id contained in a raw ID register value.
    fn get_apic_id(&self, raw: u32) -> u32;

    /// Raw ID register value for `id`.
    fn set_apic_id(&self, id: u32) -> u32;

    fn apic_id_valid(&self, id: u32) -> bool;

    /// Is the calling CPU's own APIC id known to the CPU map?
    fn apic_id_registered(&self) -> bool {
        apicid_to_cpu(self.get_apic_id(self.read(APIC_ID))).is_some()
    }

    fn irq_delivery_mode(&self) -> DeliveryMode;
    fn irq_dest_mode(&self) -> DestMode;

    /// Whether AP wakeup sends the level-triggered INIT de-assert.
    fn init_deassert(&self) -> bool {
        true
    }

    fn send_ipi(&self, cpu: CpuId, vector: u8) {
        ipi::send_ipi(self, cpu, vector)
    }

    fn send_ipi_mask(&self, mask: &CpuMask, vector: u8) {
        ipi::send_ipi_mask(self, mask, vector)
    }

    fn send_ipi_mask_allbutself(&self, mask: &CpuMask, vector: u8) {
        ipi::send_ipi_mask_allbutself(self, mask, vector)
    }

    fn send_ipi_allbutself(&self, vector: u8) {
        ipi::send_ipi_allbutself(self, vector)
    }

    fn send_ipi_all(&self, vector: u8) {
        ipi::send_ipi_all(self, vector)
    }

    fn send_ipi_self(&self, vector: u8) {
        ipi::send_ipi_self(self, vector)
    }

    fn wakeup_secondary_cpu(&self, apicid: u32, start_eip: u64) -> Result<(), ApicError> {
        ipi::wakeup_secondary_cpu(self, apicid, start_eip)
    }
}

/// Stand-in until `setup_apic_driver` has run.
struct NoopApic;

impl ApicDriver for NoopApic {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn probe(&self) -> bool {
        false
    }

    fn read(&self, _reg: u32) -> u32 {
        0
    }

    fn write(&self, _reg: u32, _value: u32) {}

    fn icr_read(&self) -> u64 {
        0
    }

    fn icr_write(&self, _low: u32, _dest: u32) {}

    fn wait_icr_idle(&self) {}

    fn safe_wait_icr_idle(&self) -> Result<(), ApicError> {
        Ok(())
    }

    fn get_apic_id(&self, _raw: u32) -> u32 {
        0
    }

    fn set_apic_id(&self, _id: u32) -> u32 {
        0
    }

    fn apic_id_valid(&self, _id: u32) -> bool {
        false
    }

    fn irq_delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::Fixed
    }

    fn irq_dest_mode(&self) -> DestMode {
        DestMode::Physical
    }
}

static NOOP_APIC: NoopApic = NoopApic;

// ============================================================================
// Registration and selection
// ============================================================================

/// Maximum number of candidate drivers.
pub const MAX_APIC_DRIVERS: usize = 8;

/// Candidate drivers in probe order.
#[derive(Clone, Copy)]
pub struct ApicDriverList {
    drivers: [Option<&'static dyn ApicDriver>; MAX_APIC_DRIVERS],
    len: usize,
}

impl ApicDriverList {
    const fn new() -> Self {
        Self {
            drivers: [None; MAX_APIC_DRIVERS],
            len: 0,
        }
    }

    fn contains(&self, driver: &'static dyn ApicDriver) -> bool {
        self.iter().any(|d| core::ptr::addr_eq(d, driver))
    }

    fn push(&mut self, driver: &'static dyn ApicDriver) -> Result<(), ApicError> {
        let slot = self.drivers.get_mut(self.len).ok_or(ApicError::RegistryFull)?;
        *slot = Some(driver);
        self.len += 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static dyn ApicDriver> + '_ {
        self.drivers[..self.len].iter().flatten().copied()
    }
}

static APIC_DRIVERS: Mutex<ApicDriverList> = Mutex::new(ApicDriverList::new());
static ACTIVE_APIC: Once<&'static dyn ApicDriver> = Once::new();

/// Append a candidate. Registering the same driver twice is a no-op.
pub fn register_apic_driver(driver: &'static dyn ApicDriver) -> Result<(), ApicError> {
    let mut list = APIC_DRIVERS.lock();
    if list.contains(driver) {
        return Ok(());
    }
    list.push(driver)?;
    crate::kdebug!("APIC: registered driver '{}'", driver.name());
    Ok(())
}

/// Register the built-in drivers, most capable first.
pub fn register_default_apic_drivers() -> Result<(), ApicError> {
    #[cfg(feature = "x2apic")]
    register_apic_driver(&x2apic::X2APIC_PHYS)?;
    register_apic_driver(&xapic::XAPIC)
}

pub fn registered_apic_drivers() -> ApicDriverList {
    *APIC_DRIVERS.lock()
}

/// First candidate whose probe succeeds. Later candidates are not probed.
pub fn select_apic_driver<I>(candidates: I) -> Option<&'static dyn ApicDriver>
where
    I: IntoIterator<Item = &'static dyn ApicDriver>,
{
    candidates.into_iter().find(|driver| driver.probe())
}

/// Select the active driver from the registered candidates, once.
pub fn try_setup_apic_driver() -> Result<&'static dyn ApicDriver, ApicError> {
    if let Some(active) = ACTIVE_APIC.get() {
        return Ok(*active);
    }
    let candidates = registered_apic_drivers();
    let driver = select_apic_driver(candidates.iter()).ok_or(ApicError::NoDriver)?;
    let active = *ACTIVE_APIC.call_once(|| driver);
    crate::kinfo!("APIC: switched to {} driver", active.name());
    Ok(active)
}

/// Boot-time driver selection. Running without an APIC is not an option.
pub fn setup_apic_driver() -> &'static dyn ApicDriver {
    match try_setup_apic_driver() {
        Ok(driver) => driver,
        Err(err) => {
            crate::kfatal!("APIC: {}", err);
            panic!("APIC: {}", err);
        }
    }
}

/// The active driver, once selected.
pub fn apic() -> Option<&'static dyn ApicDriver> {
    ACTIVE_APIC.get().copied()
}

#[inline]
fn active() -> &'static dyn ApicDriver {
    match ACTIVE_APIC.get() {
        Some(driver) => *driver,
        None => &NOOP_APIC,
    }
}

// ============================================================================
// Global register access
// ============================================================================

static EOI_OVERRIDE: Once<fn(u32, u32)> = Once::new();

#[inline]
pub fn apic_read(reg: u32) -> u32 {
    active().read(reg)
}

#[inline]
pub fn apic_write(reg: u32, value: u32) {
    active().write(reg, value)
}

/// Acknowledge the interrupt being serviced.
#[inline]
pub fn apic_eoi() {
    match EOI_OVERRIDE.get() {
        Some(eoi_write) => eoi_write(APIC_EOI, APIC_EOI_ACK),
        None => active().eoi_write(APIC_EOI, APIC_EOI_ACK),
    }
}

#[inline]
pub fn apic_icr_read() -> u64 {
    active().icr_read()
}

#[inline]
pub fn apic_icr_write(low: u32, dest: u32) {
    active().icr_write(low, dest)
}

#[inline]
pub fn apic_wait_icr_idle() {
    active().wait_icr_idle()
}

pub fn safe_apic_wait_icr_idle() -> Result<(), ApicError> {
    active().safe_wait_icr_idle().inspect_err(|err| {
        crate::kwarn!("APIC: {} (ICR {:#x})", err, active().icr_read());
    })
}

/// Route EOIs through `eoi_write` (paravirtual EOI and the like).
///
/// Only the first override is kept.
pub fn apic_set_eoi_write(eoi_write: fn(u32, u32)) {
    EOI_OVERRIDE.call_once(|| {
        crate::kinfo!("APIC: EOI write overridden");
        eoi_write
    });
}

/// Set the virtual address of the xAPIC register page.
pub fn init_apic_mappings(base: u64) {
    xapic::set_mmio_base(base);
    crate::kdebug!("APIC: xAPIC registers mapped at {:#x}", base);
}

pub fn apic_mmio_base() -> u64 {
    xapic::mmio_base()
}

// ============================================================================
// x2APIC mode
// ============================================================================

static X2APIC_MODE: AtomicBool = AtomicBool::new(false);

pub fn x2apic_supported() -> bool {
    cfg!(feature = "x2apic") && platform::get().cpuid_features().x2apic
}

/// Supported and switched on in IA32_APIC_BASE.
pub fn x2apic_enabled() -> bool {
    if !x2apic_supported() {
        return false;
    }
    // SAFETY: IA32_APIC_BASE exists on every CPU that reports x2APIC.
    let base = unsafe { platform::get().read_msr(regs::MSR_IA32_APICBASE) };
    base & regs::X2APIC_ENABLE != 0
}

/// Latch whether firmware left the CPU in x2APIC mode.
pub fn check_x2apic() {
    if x2apic_enabled() {
        X2APIC_MODE.store(true, Ordering::Release);
        crate::kinfo!("x2apic: enabled by BIOS, switching to x2apic ops");
    } else if x2apic_supported() {
        crate::kdebug!("x2apic: supported but not enabled");
    }
}

pub fn x2apic_mode() -> bool {
    X2APIC_MODE.load(Ordering::Acquire)
}

// ============================================================================
// CPU to APIC id map
// ============================================================================

static CPU_TO_APICID: PerCpu<AtomicU32> =
    PerCpu::from_array([const { AtomicU32::new(BAD_APICID) }; MAX_CPUS]);

/// Record the APIC id of logical CPU `cpu` (filled from the MADT at boot).
pub fn set_cpu_apic_id(cpu: CpuId, apicid: u32) {
    if let Some(slot) = CPU_TO_APICID.for_cpu(cpu) {
        slot.store(apicid, Ordering::Release);
    }
}

/// Forget `cpu`'s APIC id (CPU went offline).
pub fn clear_cpu_apic_id(cpu: CpuId) {
    set_cpu_apic_id(cpu, BAD_APICID);
}

pub fn cpu_physical_id(cpu: CpuId) -> Option<u32> {
    CPU_TO_APICID
        .for_cpu(cpu)
        .map(|slot| slot.load(Ordering::Acquire))
        .filter(|&id| id != BAD_APICID)
}

pub fn apicid_to_cpu(apicid: u32) -> Option<CpuId> {
    if apicid == BAD_APICID {
        return None;
    }
    CPU_TO_APICID
        .iter()
        .position(|slot| slot.load(Ordering::Acquire) == apicid)
        .map(|cpu| cpu as CpuId)
}
