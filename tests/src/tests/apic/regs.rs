//! Local APIC Register Layout Tests
//!
//! Every architected register and bit field must sit at the documented
//! offset, shift and width; the MMIO driver and the x2APIC MSR mapping both
//! depend on it.

#[cfg(test)]
mod tests {
    use crate::apic::regs::*;

    // =========================================================================
    // Layout Tests
    // =========================================================================

    #[test]
    fn test_register_page_size() {
        assert_eq!(std::mem::size_of::<LocalApicRegs>(), 0x400);
        assert_eq!(std::mem::align_of::<LocalApicRegs>(), 16);
    }

    #[test]
    fn test_register_offsets() {
        let expected: [(u32, u32); 24] = [
            (APIC_ID, 0x020),
            (APIC_LVR, 0x030),
            (APIC_TASKPRI, 0x080),
            (APIC_ARBPRI, 0x090),
            (APIC_PROCPRI, 0x0A0),
            (APIC_EOI, 0x0B0),
            (APIC_LDR, 0x0D0),
            (APIC_DFR, 0x0E0),
            (APIC_SPIV, 0x0F0),
            (APIC_ISR, 0x100),
            (APIC_TMR, 0x180),
            (APIC_IRR, 0x200),
            (APIC_ESR, 0x280),
            (APIC_ICR, 0x300),
            (APIC_ICR2, 0x310),
            (APIC_LVTT, 0x320),
            (APIC_LVTTHMR, 0x330),
            (APIC_LVTPC, 0x340),
            (APIC_LVT0, 0x350),
            (APIC_LVT1, 0x360),
            (APIC_LVTERR, 0x370),
            (APIC_TMICT, 0x380),
            (APIC_TMCCT, 0x390),
            (APIC_TDCR, 0x3E0),
        ];
        for (actual, offset) in expected {
            assert_eq!(actual, offset);
            assert_eq!(actual % 0x10, 0, "register {:#x} not slot aligned", actual);
            assert!((actual as usize) < APIC_REGS_SIZE);
        }
    }

    #[test]
    fn test_field_layout() {
        let expected = [
            (field::ID_PHYS_APIC_ID, 0x020, 24, 4),
            (field::ID_XAPIC_ID, 0x020, 24, 8),
            (field::LVR_VERSION, 0x030, 0, 8),
            (field::LVR_MAX_LVT, 0x030, 16, 8),
            (field::TPR_PRIORITY, 0x080, 0, 8),
            (field::APR_PRIORITY, 0x090, 0, 8),
            (field::PPR_PRIORITY, 0x0A0, 0, 8),
            (field::EOI, 0x0B0, 0, 32),
            (field::LDR_LOGICAL_DEST, 0x0D0, 24, 8),
            (field::DFR_MODEL, 0x0E0, 28, 4),
            (field::SVR_SPURIOUS_VECTOR, 0x0F0, 0, 8),
            (field::SVR_APIC_ENABLED, 0x0F0, 8, 1),
            (field::SVR_FOCUS_CPU, 0x0F0, 9, 1),
            (field::ESR_SEND_CS, 0x280, 0, 1),
            (field::ESR_RECEIVE_CS, 0x280, 1, 1),
            (field::ESR_SEND_ACCEPT, 0x280, 2, 1),
            (field::ESR_RECEIVE_ACCEPT, 0x280, 3, 1),
            (field::ESR_SEND_ILLEGAL_VECTOR, 0x280, 5, 1),
            (field::ESR_RECEIVE_ILLEGAL_VECTOR, 0x280, 6, 1),
            (field::ESR_ILLEGAL_REGISTER_ADDRESS, 0x280, 7, 1),
            (field::ESR_ALL_ERRORS, 0x280, 0, 32),
            (field::ICR1_VECTOR, 0x300, 0, 8),
            (field::ICR1_DELIVERY_MODE, 0x300, 8, 3),
            (field::ICR1_DESTINATION_MODE, 0x300, 11, 1),
            (field::ICR1_DELIVERY_STATUS, 0x300, 12, 1),
            (field::ICR1_LEVEL, 0x300, 14, 1),
            (field::ICR1_TRIGGER, 0x300, 15, 1),
            (field::ICR1_SHORTHAND, 0x300, 18, 2),
            (field::ICR2_PHYS_DEST, 0x310, 24, 4),
            (field::ICR2_LOGICAL_DEST, 0x310, 24, 8),
            (field::LVTT_VECTOR, 0x320, 0, 8),
            (field::LVTT_DELIVERY_STATUS, 0x320, 12, 1),
            (field::LVTT_MASK, 0x320, 16, 1),
            (field::LVTT_TIMER_MODE, 0x320, 17, 1),
            (field::LVTTHMR_VECTOR, 0x330, 0, 8),
            (field::LVTTHMR_DELIVERY_MODE, 0x330, 8, 3),
            (field::LVTTHMR_DELIVERY_STATUS, 0x330, 12, 1),
            (field::LVTTHMR_MASK, 0x330, 16, 1),
            (field::LVTPC_VECTOR, 0x340, 0, 8),
            (field::LVTPC_DELIVERY_MODE, 0x340, 8, 3),
            (field::LVTPC_DELIVERY_STATUS, 0x340, 12, 1),
            (field::LVTPC_MASK, 0x340, 16, 1),
            (field::LVTERR_VECTOR, 0x370, 0, 8),
            (field::LVTERR_DELIVERY_STATUS, 0x370, 12, 1),
            (field::LVTERR_MASK, 0x370, 16, 1),
            (field::TMICT_INITIAL_COUNT, 0x380, 0, 32),
            (field::TMCCT_CURRENT_COUNT, 0x390, 0, 32),
            (field::TDCR_DIVISOR, 0x3E0, 0, 4),
        ];
        for (f, offset, shift, width) in expected {
            assert_eq!(f, RegField::new(offset, shift, width), "{:?}", f);
        }
    }

    #[test]
    fn test_lint_fields_shared_by_lint0_and_lint1() {
        for lvt in [APIC_LVT0, APIC_LVT1] {
            assert_eq!(field::lint_vector(lvt), RegField::new(lvt, 0, 8));
            assert_eq!(field::lint_delivery_mode(lvt), RegField::new(lvt, 8, 3));
            assert_eq!(field::lint_delivery_status(lvt), RegField::new(lvt, 12, 1));
            assert_eq!(field::lint_polarity(lvt), RegField::new(lvt, 13, 1));
            assert_eq!(field::lint_remote_irr(lvt), RegField::new(lvt, 14, 1));
            assert_eq!(field::lint_trigger(lvt), RegField::new(lvt, 15, 1));
            assert_eq!(field::lint_mask(lvt), RegField::new(lvt, 16, 1));
        }
    }

    #[test]
    fn test_isr_tmr_irr_banks() {
        for n in 0..8 {
            assert_eq!(field::isr(n).offset, 0x100 + n * 0x10);
            assert_eq!(field::tmr(n).offset, 0x180 + n * 0x10);
            assert_eq!(field::irr(n).offset, 0x200 + n * 0x10);
        }
        assert_eq!(field::isr(7).offset, 0x170);
        assert_eq!(field::tmr(7).offset, 0x1F0);
        assert_eq!(field::irr(7).offset, 0x270);
    }

    // =========================================================================
    // RegField Tests
    // =========================================================================

    #[test]
    fn test_regfield_mask() {
        assert_eq!(field::ID_XAPIC_ID.mask(), 0xFF00_0000);
        assert_eq!(field::ICR1_SHORTHAND.mask(), 0x000C_0000);
        assert_eq!(field::EOI.mask(), u32::MAX);
    }

    #[test]
    fn test_regfield_extract_insert() {
        let raw = 0x1234_5678;
        assert_eq!(field::ID_XAPIC_ID.extract(raw), 0x12);
        assert_eq!(field::ID_PHYS_APIC_ID.extract(raw), 0x2);

        let updated = field::SVR_APIC_ENABLED.insert(0x0000_00FF, 1);
        assert_eq!(updated, 0x0000_01FF);

        // Excess bits are dropped, neighbours preserved
        let masked = field::DFR_MODEL.insert(0x0FFF_FFFF, 0x1F);
        assert_eq!(masked, 0xFFFF_FFFF);
    }

    // =========================================================================
    // Register Image Tests
    // =========================================================================

    #[test]
    fn test_regs_read_write() {
        let mut regs = LocalApicRegs::new();
        regs.write(APIC_ICR2, 0x0300_0000);
        assert_eq!(regs.read(APIC_ICR2), Some(0x0300_0000));
        assert_eq!(regs.read(APIC_ICR), Some(0));
        assert_eq!(regs.read(0x3FC), Some(0));
        assert_eq!(regs.read(0x3FD), None);
        assert_eq!(regs.read(0x400), None);

        // Out of range write is ignored
        regs.write(0x400, 0xDEAD);
    }

    #[test]
    fn test_regs_field_access() {
        let mut regs = LocalApicRegs::default();
        regs.set(field::SVR_SPURIOUS_VECTOR, 0xFF);
        regs.set(field::SVR_APIC_ENABLED, 1);
        assert_eq!(regs.read(APIC_SPIV), Some(0x1FF));
        assert_eq!(regs.get(field::SVR_FOCUS_CPU), 0);

        regs.set(field::ICR1_DELIVERY_STATUS, 1);
        assert_eq!(regs.read(APIC_ICR), Some(0x1000));
    }

    // =========================================================================
    // x2APIC MSR Mapping Tests
    // =========================================================================

    #[test]
    fn test_x2apic_msr_mapping() {
        assert_eq!(x2apic_msr(APIC_ID), 0x802);
        assert_eq!(x2apic_msr(APIC_TASKPRI), 0x808);
        assert_eq!(x2apic_msr(APIC_EOI), 0x80B);
        assert_eq!(x2apic_msr(APIC_SPIV), 0x80F);
        assert_eq!(x2apic_msr(APIC_ICR), 0x830);
        assert_eq!(x2apic_msr(APIC_LVTT), 0x832);
        assert_eq!(x2apic_msr(APIC_TDCR), 0x83E);
    }

    #[test]
    fn test_constants() {
        assert_eq!(BAD_APICID, 0xFFFF);
        assert_eq!(APIC_EOI_ACK, 0);
        assert_eq!(X2APIC_ENABLE, 0x400);
        assert_eq!(MSR_IA32_APICBASE, 0x1B);
    }
}
