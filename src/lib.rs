//! NexaOS multiprocessor synchronization core
//!
//! Local APIC drivers and IPI dispatch, TLB shootdown across CPUs sharing
//! an address space, and the per-CPU preemption counter that keeps both
//! pinned to one CPU while they run.

#![no_std]

pub mod apic;
pub mod arch;
pub mod config;
pub mod init;
pub mod logger;
pub mod mm;
pub mod percpu;
pub mod platform;
pub mod preempt;
pub mod serial;

pub use apic::{
    apic_eoi, apic_icr_read, apic_icr_write, apic_read, apic_wait_icr_idle, apic_write,
    register_apic_driver, safe_apic_wait_icr_idle, setup_apic_driver, ApicDriver, ApicError,
};
pub use mm::{
    flush_tlb_current_task, flush_tlb_mm_range, flush_tlb_others, switch_mm, switch_mm_irqs_off,
    AddressSpace, TLB_FLUSH_ALL,
};
pub use platform::Platform;
pub use preempt::{preempt_disable, preempt_enable, PreemptGuard};

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::FATAL, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::ERROR, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::WARN, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::INFO, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::DEBUG, $($arg)*);
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::TRACE, $($arg)*);
    }};
}
