//! Boot-time bring-up of the synchronization core
//!
//! Called by the boot CPU, interrupts off, before any secondary CPU runs:
//! 1. Platform hooks are installed (scheduler, cross-call dispatcher)
//! 2. The firmware's x2APIC choice is latched
//! 3. Built-in APIC drivers are registered and one is selected
//!
//! The logger is brought up separately by the kernel, first thing.

use crate::apic::{self, ApicDriver, ApicError};
use crate::config;
use crate::platform::{self, Platform};

pub fn init(hooks: &'static dyn Platform) -> Result<&'static dyn ApicDriver, ApicError> {
    if let Err(msg) = platform::install(hooks) {
        crate::kwarn!("mpsync: {}", msg);
    }

    apic::check_x2apic();
    apic::register_default_apic_drivers()?;
    let driver = apic::try_setup_apic_driver()?;

    crate::kinfo!("mpsync: {} (apic={})", config::snapshot(), driver.name());
    Ok(driver)
}

/// Like [`init`], but a machine without a usable APIC halts the boot.
pub fn init_or_die(hooks: &'static dyn Platform) -> &'static dyn ApicDriver {
    match init(hooks) {
        Ok(driver) => driver,
        Err(err) => {
            crate::kfatal!("mpsync: initialization failed: {}", err);
            panic!("mpsync: {}", err);
        }
    }
}
