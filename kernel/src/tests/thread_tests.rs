//! Thread Unit Tests
//!
//! Tests for thread creation, joining and the shared address space.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::common::*;
    use crate::arch::hosted::UserProc;
    use crate::config::{KernelConfig, PAGE_SIZE};
    use crate::error::ProcError;
    use crate::process::EntryKind;

    // ========================================
    // Create / Join Tests
    // ========================================

    #[test]
    fn test_thread_shares_address_space() {
        let (joined, byte) = run_init(KernelConfig::default(), |p| {
            p.spawn_thread(
                |t| {
                    t.write(0, &[t.arg() as u8]).unwrap();
                    0
                },
                7,
            )
            .unwrap();
            let joined = p.thread_join();
            (joined, p.read(0, 1).unwrap()[0])
        });
        assert_eq!(joined, Ok(()));
        assert_eq!(byte, 7);
    }

    #[test]
    fn test_join_without_threads_fails() {
        let result = run_init(KernelConfig::default(), |p| p.thread_join());
        assert_eq!(result, Err(ProcError::LostChild));
    }

    #[test]
    fn test_thread_entry_details() {
        let (tx, rx) = reporter();
        let (tid, info, before, after) = run_init(KernelConfig::default(), move |p| {
            let tx = tx.clone();
            let before = p.getnumproc();
            let tid = p
                .spawn_thread(
                    move |t| {
                        tx.send(t.getpid());
                        t.sleep(0).unwrap();
                        0
                    },
                    0,
                )
                .unwrap();
            let info = p.getprocinfo(tid).unwrap();
            let during = p.getnumproc();
            p.thread_join().unwrap();
            (tid, info, (before, during), p.getnumproc())
        });
        assert_eq!(rx.recv().unwrap(), tid);
        assert_eq!(info.kind, EntryKind::Thread);
        assert_eq!(info.ppid, Some(crate::ProcessId::INIT));
        assert_eq!(info.name, "init");
        assert_eq!(before, (1, 2));
        assert_eq!(after, 1);
    }

    #[test]
    fn test_join_reaps_every_thread() {
        let result = run_init(KernelConfig::default().with_cpus(2), |p| {
            for i in 0..3 {
                p.spawn_thread(
                    |t| {
                        let slot = t.arg();
                        t.write(slot, &[1]).unwrap();
                        0
                    },
                    i,
                )
                .unwrap();
            }
            for _ in 0..3 {
                p.thread_join().unwrap();
            }
            (p.read(0, 3).unwrap(), p.thread_join())
        });
        assert_eq!(result.0, [1, 1, 1]);
        assert_eq!(result.1, Err(ProcError::LostChild));
    }

    #[test]
    fn test_thread_create_on_full_table() {
        let config = KernelConfig::default().with_max_processes(2);
        let result = run_init(config, |p| {
            p.spawn_thread(|_| 0, 0).unwrap();
            let second = p.spawn_thread(|_| 0, 1);
            p.thread_join().unwrap();
            second
        });
        assert_eq!(result, Err(ProcError::ResourceExhausted));
    }

    #[test]
    fn test_kill_interrupts_join() {
        let (tx, rx) = reporter();
        let (holder, reaped) = run_init(KernelConfig::default(), move |p| {
            let tx = tx.clone();
            let holder = p
                .fork_with(move |c| {
                    c.spawn_thread(|t| t.sleep(1_000_000).map_or(-1, |()| 0), 0)
                        .unwrap();
                    tx.send(c.kernel().thread_join());
                    0
                })
                .unwrap();
            // The thread takes the next pid.
            let thread = crate::ProcessId(holder.0 + 1);
            wait_until_sleeping(p, thread);
            wait_until_sleeping(p, holder);
            p.kill(holder).unwrap();
            let first = p.wait().unwrap();
            // The orphaned thread now belongs to init.
            p.kill(thread).unwrap();
            let second = p.wait().unwrap();
            (holder, [first, second])
        });
        assert_eq!(rx.recv().unwrap(), Err(ProcError::Killed));
        assert_eq!(reaped[0], (holder, 0));
        assert_eq!(reaped[1], (crate::ProcessId(holder.0 + 1), -1));
    }

    #[test]
    fn test_wait_ignores_own_threads() {
        let result = run_init(KernelConfig::default(), |p| {
            p.spawn_thread(|_| 0, 0).unwrap();
            let waited = p.wait();
            p.thread_join().unwrap();
            waited
        });
        assert_eq!(result, Err(ProcError::LostChild));
    }

    // ========================================
    // Stack Validation Tests
    // ========================================

    #[test]
    fn test_thread_stack_must_be_inside_address_space() {
        let results = run_init(KernelConfig::default(), |p| {
            let entry = p.kernel().arch().register(Arc::new(|_: &UserProc| 0));
            let size = p.sbrk(0).unwrap();
            [
                p.thread_create(entry, 0, size),
                p.thread_create(entry, 0, 1),
                p.thread_create(usize::MAX, 0, 0),
            ]
        });
        assert_eq!(results[0], Err(ProcError::InvalidArgument));
        assert_eq!(results[1], Err(ProcError::InvalidArgument));
        assert_eq!(results[2], Err(ProcError::InvalidArgument));
    }

    #[test]
    fn test_thread_stack_allocated_with_sbrk() {
        let (stack, size) = run_init(KernelConfig::default(), |p| {
            let before = p.sbrk(0).unwrap();
            p.spawn_thread(|_| 0, 0).unwrap();
            p.thread_join().unwrap();
            (before, p.sbrk(0).unwrap())
        });
        assert_eq!(size, stack + PAGE_SIZE);
    }
}
