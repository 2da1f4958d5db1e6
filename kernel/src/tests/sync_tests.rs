//! Synchronization Unit Tests
//!
//! Tests for tick sleeping, conditions and cancellation.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::common::*;
    use crate::config::KernelConfig;
    use crate::error::ProcError;
    use crate::sync::{Channel, Condition};

    // ========================================
    // Tick Sleep Tests
    // ========================================

    #[test]
    fn test_sleep_zero_returns_immediately() {
        let result = run_init(KernelConfig::default(), |p| {
            let before = p.uptime();
            (p.sleep(0), p.uptime() - before)
        });
        assert_eq!(result, (Ok(()), 0));
    }

    #[test]
    fn test_sleep_waits_for_ticks() {
        let (result, elapsed) = run_init_ticking(KernelConfig::default(), |p| {
            let before = p.uptime();
            let result = p.sleep(3);
            (result, p.uptime() - before)
        });
        assert_eq!(result, Ok(()));
        assert!(elapsed >= 3);
    }

    #[test]
    fn test_negative_sleep_rejected() {
        let result = run_init(KernelConfig::default(), |p| p.sleep(-1));
        assert_eq!(result, Err(ProcError::InvalidArgument));
    }

    // ========================================
    // Condition Tests
    // ========================================

    #[test]
    fn test_condition_wakes_waiter() {
        let seen = run_init(KernelConfig::default(), |p| {
            let cond = Arc::new(Condition::new(0u32, Channel::Token(7)));
            let (tx, rx) = reporter();

            let waiter = cond.clone();
            let child = p
                .fork_with(move |c| {
                    let kernel = c.kernel();
                    let token = kernel.cancel_token();
                    let value = waiter
                        .lock(kernel)
                        .wait_while(&token, |v| *v == 0)
                        .map(|guard| *guard);
                    tx.send(value);
                    0
                })
                .unwrap();

            wait_until_sleeping(p, child);
            {
                let mut value = cond.lock(p.kernel());
                *value = 5;
                value.notify_all();
            }
            p.wait().unwrap();
            rx.recv().unwrap()
        });
        assert_eq!(seen, Ok(5));
    }

    #[test]
    fn test_kill_cancels_condition_wait() {
        let (seen, status) = run_init(KernelConfig::default(), |p| {
            let cond = Arc::new(Condition::new((), Channel::Token(9)));
            let (tx, rx) = reporter();

            let waiter = cond.clone();
            let child = p
                .fork_with(move |c| {
                    let kernel = c.kernel();
                    let token = kernel.cancel_token();
                    let result = waiter.lock(kernel).wait_while(&token, |_| true).map(drop);
                    tx.send(result);
                    0
                })
                .unwrap();

            wait_until_sleeping(p, child);
            p.kill(child).unwrap();
            let (_, status) = p.wait().unwrap();
            (rx.recv().unwrap(), status)
        });
        assert_eq!(seen, Err(ProcError::Killed));
        // A killed process leaving through its own exit keeps its status.
        assert_eq!(status, 0);
    }

    #[test]
    fn test_uptime_is_monotonic() {
        let (first, second) = run_init_ticking(KernelConfig::default(), |p| {
            let first = p.uptime();
            p.sleep(1).unwrap();
            (first, p.uptime())
        });
        assert!(second > first);
    }
}
