//! x2APIC Driver Tests
//!
//! Register access goes through the mock machine's MSR file.

#[cfg(all(test, feature = "x2apic"))]
mod tests {
    use crate::apic::regs::{
        APIC_DFR, APIC_EOI, APIC_ICR, APIC_ID, APIC_LDR, APIC_LVR, APIC_TASKPRI,
        MSR_IA32_APICBASE, MSR_IA32_APICBASE_ENABLE, X2APIC_ENABLE,
    };
    use crate::apic::x2apic::X2APIC_PHYS;
    use crate::apic::{self, ApicDriver};
    use crate::arch::CpuFeatures;
    use crate::mock::MockMachine;
    use crate::tests::fixture::setup;
    use rusty_fork::rusty_fork_test;
    use serial_test::serial;

    fn x2apic_machine() -> &'static MockMachine {
        let m = setup();
        m.set_features(CpuFeatures {
            apic: true,
            x2apic: true,
        });
        m.set_msr(MSR_IA32_APICBASE, 0xFEE0_0000 | MSR_IA32_APICBASE_ENABLE | X2APIC_ENABLE);
        m.clear_events();
        m
    }

    #[test]
    #[serial]
    fn test_x2apic_enabled_reads_apic_base() {
        let m = x2apic_machine();
        assert!(apic::x2apic_supported());
        assert!(apic::x2apic_enabled());

        // Supported, but firmware left the CPU in xAPIC mode
        m.set_msr(MSR_IA32_APICBASE, 0xFEE0_0000 | MSR_IA32_APICBASE_ENABLE);
        assert!(apic::x2apic_supported());
        assert!(!apic::x2apic_enabled());

        m.set_features(CpuFeatures {
            apic: true,
            x2apic: false,
        });
        assert!(!apic::x2apic_supported());
        assert!(!apic::x2apic_enabled());
    }

    rusty_fork_test! {
        #[test]
        fn test_check_x2apic_latches_mode() {
            setup();
            apic::check_x2apic();
            assert!(!apic::x2apic_mode());

            x2apic_machine();
            apic::check_x2apic();
            assert!(apic::x2apic_mode());
        }

        #[test]
        fn test_probe_follows_latched_mode() {
            x2apic_machine();
            // Enabled in IA32_APIC_BASE, but not latched yet
            assert!(!X2APIC_PHYS.probe());

            apic::check_x2apic();
            assert!(X2APIC_PHYS.probe());
        }

        #[test]
        fn test_probe_fails_when_firmware_kept_xapic() {
            let m = x2apic_machine();
            m.set_msr(MSR_IA32_APICBASE, 0xFEE0_0000 | MSR_IA32_APICBASE_ENABLE);

            apic::check_x2apic();
            assert!(!apic::x2apic_mode());
            assert!(!X2APIC_PHYS.probe());
        }
    }

    #[test]
    #[serial]
    fn test_dfr_reads_all_ones() {
        let m = x2apic_machine();
        m.set_msr(0x80E, 0x1234);
        assert_eq!(X2APIC_PHYS.read(APIC_DFR), 0xFFFF_FFFF);
    }

    #[test]
    #[serial]
    fn test_read_maps_to_msr() {
        let m = x2apic_machine();
        m.set_msr(0x802, 0x0000_0107);
        assert_eq!(X2APIC_PHYS.read(APIC_ID), 0x107);
        assert_eq!(X2APIC_PHYS.get_apic_id(X2APIC_PHYS.read(APIC_ID)), 0x107);
    }

    #[test]
    #[serial]
    fn test_read_only_writes_ignored() {
        let m = x2apic_machine();

        X2APIC_PHYS.write(APIC_DFR, 1);
        X2APIC_PHYS.write(APIC_ID, 2);
        X2APIC_PHYS.write(APIC_LDR, 3);
        X2APIC_PHYS.write(APIC_LVR, 4);
        assert!(m.msr_writes().is_empty());

        X2APIC_PHYS.write(APIC_TASKPRI, 0x30);
        assert_eq!(m.msr_writes(), vec![(0x808, 0x30)]);
    }

    #[test]
    #[serial]
    fn test_eoi_writes_ack_regardless_of_arguments() {
        let m = x2apic_machine();

        X2APIC_PHYS.eoi_write(0x123, 0x456);
        X2APIC_PHYS.eoi_write(APIC_EOI, 0);

        assert_eq!(m.msr_writes(), vec![(0x80B, 0), (0x80B, 0)]);
    }

    #[test]
    #[serial]
    fn test_icr_is_single_64bit_write() {
        let m = x2apic_machine();

        X2APIC_PHYS.icr_write(0x0000_40F0, 0x1234_5678);

        assert_eq!(m.msr_writes(), vec![(0x830, 0x1234_5678_0000_40F0)]);
        assert_eq!(X2APIC_PHYS.icr_read(), 0x1234_5678_0000_40F0);
        assert_eq!(X2APIC_PHYS.read(APIC_ICR), 0x40F0);
    }

    #[test]
    #[serial]
    fn test_no_busy_bit() {
        x2apic_machine();
        X2APIC_PHYS.wait_icr_idle();
        assert_eq!(X2APIC_PHYS.safe_wait_icr_idle(), Ok(()));
    }

    #[test]
    #[serial]
    fn test_wakeup_skips_init_deassert() {
        let m = x2apic_machine();

        X2APIC_PHYS.wakeup_secondary_cpu(0x300, 0x8000).unwrap();

        let icr: Vec<u64> = m
            .msr_writes()
            .into_iter()
            .filter(|&(msr, _)| msr == 0x830)
            .map(|(_, v)| v)
            .collect();
        assert_eq!(icr, vec![0x300_0000_C500, 0x300_0000_0608, 0x300_0000_0608]);
    }

    #[test]
    fn test_apic_id_encoding() {
        assert_eq!(X2APIC_PHYS.set_apic_id(0x1_0000), 0x1_0000);
        assert_eq!(X2APIC_PHYS.get_apic_id(0xFFFF_FFFE), 0xFFFF_FFFE);
        assert!(X2APIC_PHYS.apic_id_valid(0x1_0000));
        assert!(!X2APIC_PHYS.apic_id_valid(u32::MAX));
    }
}
