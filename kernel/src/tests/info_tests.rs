//! Process Information Unit Tests
//!
//! Tests for process counts, pid queries, per-process snapshots and `ps`.

#[cfg(test)]
mod tests {
    use super::super::common::*;
    use crate::arch::hosted::{Hosted, UserProc};
    use crate::config::KernelConfig;
    use crate::error::ProcError;
    use crate::process::{EntryKind, ProcessId, ProcessState};
    use std::sync::Arc;

    // ========================================
    // Count Tests
    // ========================================

    #[test]
    fn test_counts_follow_fork_and_reap() {
        let counts = run_init(KernelConfig::default(), |p| {
            let alone = (p.getnumproc(), p.getmaxpid());
            let child = p.fork_with(|c| c.sleep(1_000_000).map_or(-1, |()| 0)).unwrap();
            let forked = (p.getnumproc(), p.getmaxpid());
            wait_until_sleeping(p, child);
            p.kill(child).unwrap();
            p.wait().unwrap();
            let reaped = (p.getnumproc(), p.getmaxpid());
            [alone, forked, reaped]
        });
        assert_eq!(
            counts,
            [
                (1, ProcessId(1)),
                (2, ProcessId(2)),
                (1, ProcessId(2)),
            ]
        );
    }

    // ========================================
    // Snapshot Tests
    // ========================================

    #[test]
    fn test_init_snapshot() {
        let info = run_init(KernelConfig::default(), |p| p.getprocinfo(ProcessId::INIT)).unwrap();
        assert_eq!(info.pid, ProcessId::INIT);
        assert_eq!(info.ppid, None);
        assert_eq!(info.state, ProcessState::Running);
        assert_eq!(info.kind, EntryKind::Process);
        assert_eq!(info.name, "init");
        assert_eq!(info.size, IMAGE_SIZE);
        assert_eq!(info.burst, None);
        assert!(info.context_switches >= 1);
    }

    #[test]
    fn test_child_snapshot() {
        let (child, info) = run_init(KernelConfig::default(), |p| {
            let child = p.fork_with(|c| c.sleep(1_000_000).map_or(-1, |()| 0)).unwrap();
            wait_until_sleeping(p, child);
            let info = p.getprocinfo(child);
            p.kill(child).unwrap();
            p.wait().unwrap();
            (child, info)
        });
        let info = info.unwrap();
        assert_eq!(info.pid, child);
        assert_eq!(info.ppid, Some(ProcessId::INIT));
        assert_eq!(info.state, ProcessState::Sleeping);
        assert_eq!(info.size, IMAGE_SIZE);
    }

    #[test]
    fn test_unknown_pid_has_no_snapshot() {
        let result = run_init(KernelConfig::default(), |p| p.getprocinfo(ProcessId(77)));
        assert_eq!(result, Err(ProcError::NotFound));
    }

    #[test]
    fn test_snapshot_lists_live_entries_in_table_order() {
        let pids = run_init(KernelConfig::default(), |p| {
            let child = p.fork_with(|c| c.sleep(1_000_000).map_or(-1, |()| 0)).unwrap();
            wait_until_sleeping(p, child);
            let pids: Vec<_> = p
                .kernel()
                .processes_snapshot()
                .into_iter()
                .map(|info| info.pid)
                .collect();
            p.kill(child).unwrap();
            p.wait().unwrap();
            pids
        });
        assert_eq!(pids, [ProcessId(1), ProcessId(2)]);
    }

    // ========================================
    // ps Tests
    // ========================================

    #[test]
    fn test_ps_prints_every_process() {
        let init = Arc::new(|p: &UserProc| {
            p.set_burst_time(6).unwrap();
            p.ps();
            0
        });
        let machine = Hosted::boot(KernelConfig::default(), MEMORY_LIMIT, IMAGE_SIZE, init).unwrap();
        let arch = machine.kernel().arch();
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while !arch.console_output().contains("init") {
            assert!(std::time::Instant::now() < deadline, "ps printed nothing");
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let output = arch.console_output();
        machine.shutdown();

        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("pid\tppid\tstate\tburst\tticks\tname"));
        let row = lines.next().unwrap();
        assert!(row.starts_with("1\t0\trun\t6\t"), "{}", row);
        assert!(row.ends_with("\tinit"), "{}", row);
    }
}
