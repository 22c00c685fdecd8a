//! Per-CPU Table Tests
//!
//! Tests for CpuMask set operations, AtomicCpuMask snapshots and PerCpu
//! slot access through a PreemptGuard.

#[cfg(test)]
mod tests {
    use crate::mock::set_current_cpu;
    use crate::percpu::{AtomicCpuMask, CpuId, CpuMask, PerCpu, MAX_CPUS};
    use crate::preempt::PreemptGuard;
    use crate::tests::fixture::setup;
    use serial_test::serial;
    use std::sync::atomic::{AtomicU32, Ordering};

    // =========================================================================
    // CpuMask Tests
    // =========================================================================

    #[test]
    fn test_cpumask_empty() {
        let mask = CpuMask::new();
        assert!(mask.is_empty());
        assert_eq!(mask.weight(), 0);
        assert_eq!(mask.iter().next(), None);
        assert_eq!(mask.any_but(0), None);
    }

    #[test]
    fn test_cpumask_set_clear_test() {
        let mut mask = CpuMask::new();
        mask.set(0);
        mask.set(63);
        mask.set(64);
        mask.set(255);

        assert!(mask.test(0));
        assert!(mask.test(63));
        assert!(mask.test(64));
        assert!(mask.test(255));
        assert!(!mask.test(1));
        assert_eq!(mask.weight(), 4);

        mask.clear(63);
        assert!(!mask.test(63));
        assert_eq!(mask.weight(), 3);
    }

    #[test]
    fn test_cpumask_out_of_range_ignored() {
        let mut mask = CpuMask::new();
        mask.set(MAX_CPUS as CpuId);
        mask.set(u16::MAX);
        assert!(mask.is_empty());
        assert!(!mask.test(MAX_CPUS as CpuId));
    }

    #[test]
    fn test_cpumask_iter_crosses_words_in_order() {
        let mask: CpuMask = [200, 3, 64, 130, 0].into_iter().collect();
        let cpus: Vec<CpuId> = mask.iter().collect();
        assert_eq!(cpus, vec![0, 3, 64, 130, 200]);
    }

    #[test]
    fn test_cpumask_any_but() {
        let only_self = CpuMask::single(2);
        assert_eq!(only_self.any_but(2), None);

        let shared: CpuMask = [2, 5].into_iter().collect();
        assert_eq!(shared.any_but(2), Some(5));
        assert_eq!(shared.any_but(5), Some(2));
        assert_eq!(shared.any_but(7), Some(2));
    }

    #[test]
    fn test_cpumask_without() {
        let mask = CpuMask::first_n(4);
        let others = mask.without(1);
        assert_eq!(others.iter().collect::<Vec<_>>(), vec![0, 2, 3]);
        // Original untouched
        assert!(mask.test(1));
    }

    #[test]
    fn test_cpumask_first_n_clamps() {
        assert_eq!(CpuMask::first_n(0).weight(), 0);
        assert_eq!(CpuMask::first_n(MAX_CPUS + 10).weight(), MAX_CPUS as u32);
    }

    #[test]
    fn test_cpumask_debug_lists_cpus() {
        let mask: CpuMask = [1, 2].into_iter().collect();
        assert_eq!(format!("{:?}", mask), "{1, 2}");
    }

    // =========================================================================
    // AtomicCpuMask Tests
    // =========================================================================

    #[test]
    fn test_atomic_cpumask_snapshot() {
        let mask = AtomicCpuMask::new();
        mask.set(1);
        mask.set(100);
        assert!(mask.test(100));

        let snap = mask.snapshot();
        mask.clear(1);

        assert!(snap.test(1));
        assert!(!mask.test(1));
        assert_eq!(mask.snapshot().iter().collect::<Vec<_>>(), vec![100]);
    }

    #[test]
    fn test_atomic_cpumask_concurrent_updates() {
        let mask = AtomicCpuMask::default();
        std::thread::scope(|s| {
            for cpu in 0..64u16 {
                let mask = &mask;
                s.spawn(move || mask.set(cpu));
            }
        });
        assert_eq!(mask.snapshot().weight(), 64);
    }

    // =========================================================================
    // PerCpu Tests
    // =========================================================================

    static COUNTERS: PerCpu<AtomicU32> =
        PerCpu::from_array([const { AtomicU32::new(0) }; MAX_CPUS]);

    #[test]
    #[serial]
    fn test_percpu_get_uses_guard_cpu() {
        setup();
        set_current_cpu(2);
        {
            let guard = PreemptGuard::new();
            COUNTERS.get(&guard).fetch_add(1, Ordering::Relaxed);
        }
        set_current_cpu(0);

        assert_eq!(COUNTERS.for_cpu(2).unwrap().load(Ordering::Relaxed), 1);
        assert_eq!(COUNTERS.for_cpu(0).unwrap().load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_percpu_for_cpu_bounds() {
        assert!(COUNTERS.for_cpu((MAX_CPUS - 1) as CpuId).is_some());
        assert!(COUNTERS.for_cpu(MAX_CPUS as CpuId).is_none());
        assert_eq!(COUNTERS.iter().count(), MAX_CPUS);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "CPU id 256 out of range")]
    fn test_percpu_slot_rejects_out_of_range_cpu() {
        static COUNTERS: PerCpu<AtomicU32> =
            PerCpu::from_array([const { AtomicU32::new(0) }; MAX_CPUS]);

        COUNTERS.slot(MAX_CPUS as CpuId).fetch_add(1, Ordering::Relaxed);
    }
}
