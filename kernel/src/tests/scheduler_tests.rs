//! Scheduler Unit Tests
//!
//! Tests for burst-time preference, round robin, preemption and SMP dispatch.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::super::common::*;
    use crate::arch::hosted::UserProc;
    use crate::config::KernelConfig;
    use crate::error::ProcError;

    /// Init forks A then B and reaps both. A optionally declares a burst
    /// time of 3 before yielding once; B never declares one.
    fn burst_scenario(a_burst: isize) -> Vec<&'static str> {
        let trace = Trace::default();
        let log = trace.clone();
        run_init(KernelConfig::default(), move |p: &UserProc| {
            let a = log.clone();
            p.fork_with(move |c| {
                if a_burst > 0 {
                    c.set_burst_time(a_burst).unwrap();
                }
                a.push("A1");
                c.yield_now();
                a.push("A2");
                0
            })
            .unwrap();
            let b = log.clone();
            p.fork_with(move |_| {
                b.push("B");
                0
            })
            .unwrap();
            p.wait().unwrap();
            p.wait().unwrap();
        });
        trace.events()
    }

    // ========================================
    // Selection Order Tests
    // ========================================

    #[test]
    fn test_burst_time_preferred_over_unset() {
        assert_eq!(burst_scenario(3), ["A1", "A2", "B"]);
    }

    #[test]
    fn test_round_robin_without_burst_times() {
        assert_eq!(burst_scenario(0), ["A1", "B", "A2"]);
    }

    // ========================================
    // Burst Time Tests
    // ========================================

    #[test]
    fn test_burst_time_set_and_cleared() {
        let values = run_init(KernelConfig::default(), |p| {
            let unset = p.get_burst_time();
            p.set_burst_time(5).unwrap();
            let set = p.get_burst_time();
            p.set_burst_time(0).unwrap();
            (unset, set, p.get_burst_time(), p.set_burst_time(-1))
        });
        assert_eq!(values, (0, 5, 0, Err(ProcError::InvalidArgument)));
    }

    #[test]
    fn test_fork_does_not_inherit_burst_time() {
        let (tx, rx) = reporter();
        run_init(KernelConfig::default(), move |p| {
            p.set_burst_time(2).unwrap();
            let tx = tx.clone();
            p.fork_with(move |c| {
                tx.send(c.get_burst_time());
                0
            })
            .unwrap();
            p.wait().unwrap();
        });
        assert_eq!(rx.recv().unwrap(), 0);
    }

    // ========================================
    // Preemption Tests
    // ========================================

    #[test]
    fn test_timer_preempts_spinning_process() {
        let ticks = run_init_ticking(KernelConfig::default(), |p| {
            let flag = Arc::new(AtomicBool::new(false));
            let (tx, rx) = reporter();

            let done = flag.clone();
            p.fork_with(move |c| {
                // Only another process can end this loop.
                while !done.load(Ordering::Acquire) {
                    c.getnumproc();
                }
                tx.send(c.getprocinfo(c.getpid()).unwrap().cpu_ticks);
                0
            })
            .unwrap();
            let setter = flag.clone();
            p.fork_with(move |_| {
                setter.store(true, Ordering::Release);
                0
            })
            .unwrap();

            p.wait().unwrap();
            p.wait().unwrap();
            rx.recv().unwrap()
        });
        assert!(ticks > 0);
    }

    #[test]
    fn test_dispatch_counts_context_switches() {
        let switches = run_init(KernelConfig::default(), |p| {
            for _ in 0..3 {
                p.yield_now();
            }
            p.getprocinfo(p.getpid()).unwrap().context_switches
        });
        assert!(switches >= 4);
    }

    // ========================================
    // SMP Tests
    // ========================================

    #[test]
    fn test_children_complete_on_several_cpus() {
        let mut statuses = run_init(KernelConfig::default().with_cpus(4), |p| {
            for i in 0..6 {
                p.fork_with(move |c| {
                    for _ in 0..10 {
                        c.yield_now();
                    }
                    i
                })
                .unwrap();
            }
            (0..6).map(|_| p.wait().unwrap().1).collect::<Vec<_>>()
        });
        statuses.sort_unstable();
        assert_eq!(statuses, [0, 1, 2, 3, 4, 5]);
    }
}
