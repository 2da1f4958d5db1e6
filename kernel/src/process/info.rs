//! Process information queries.

use alloc::string::String;
use alloc::vec::Vec;

use super::table::{EntryKind, ProcTable, ProcessId, ProcessState, SlotId};
use crate::arch::{Arch, MemoryManager};
use crate::error::{ProcError, Result};
use crate::kernel::Kernel;
use crate::scheduler::policy::BurstTime;

/// Snapshot of one table entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcInfo {
    pub pid: ProcessId,
    /// Parent pid; `None` for init.
    pub ppid: Option<ProcessId>,
    pub state: ProcessState,
    pub kind: EntryKind,
    pub name: String,
    /// Address-space size in bytes.
    pub size: usize,
    /// Timer ticks charged while RUNNING.
    pub cpu_ticks: u64,
    /// Times the entry was dispatched.
    pub context_switches: u64,
    pub burst: Option<BurstTime>,
}

impl ProcInfo {
    fn capture<M: MemoryManager>(table: &ProcTable<M>, id: SlotId) -> Self {
        let entry = table.entry(id);
        ProcInfo {
            pid: entry.pid,
            ppid: table.parent_pid(id),
            state: entry.state,
            kind: entry.kind,
            name: entry.name.clone(),
            size: entry.memory_size(),
            cpu_ticks: entry.cpu_ticks,
            context_switches: entry.switches,
            burst: entry.burst,
        }
    }
}

impl<A: Arch> Kernel<A> {
    /// Number of table entries not UNUSED.
    pub fn num_procs(&self) -> usize {
        self.lock_table().live_count()
    }

    /// Largest pid assigned so far.
    pub fn max_pid(&self) -> ProcessId {
        self.lock_table().max_pid()
    }

    /// Snapshot of the entry with `pid`.
    pub fn proc_info(&self, pid: ProcessId) -> Result<ProcInfo> {
        let guard = self.lock_table();
        let table: &ProcTable<A::Memory> = &guard;
        let id = table.find(pid).ok_or(ProcError::NotFound)?;
        Ok(ProcInfo::capture(table, id))
    }

    /// Snapshot of every live entry, in table order.
    pub fn processes_snapshot(&self) -> Vec<ProcInfo> {
        let guard = self.lock_table();
        let table: &ProcTable<A::Memory> = &guard;
        table
            .iter()
            .map(|(id, _)| ProcInfo::capture(table, id))
            .collect()
    }

    /// Print the process listing to the console.
    pub fn ps(&self) {
        // Collected first: console output must not happen under the table lock.
        let snapshot = self.processes_snapshot();
        self.arch
            .console_write(format_args!("pid\tppid\tstate\tburst\tticks\tname\n"));
        for info in &snapshot {
            self.arch.console_write(format_args!(
                "{}\t{}\t{}\t{}\t{}\t{}\n",
                info.pid,
                info.ppid.map_or(0, |p| p.0),
                info.state,
                info.burst.map_or(0, |b| b.get()),
                info.cpu_ticks,
                info.name
            ));
        }
    }
}
