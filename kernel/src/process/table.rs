//! Process Table
//!
//! Fixed-capacity arena of process/thread control blocks. Slots are named by
//! [`SlotId`], an index plus the generation the slot had when the handle was
//! taken, so a handle to a reaped entry never aliases the slot's next occupant.
//! The table itself is not synchronized; the kernel wraps it in one lock.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;

use super::address_space::AddressSpace;
use super::context::{KernelStack, StackRegion};
use crate::arch::MemoryManager;
use crate::config::PROC_NAME_LEN;
use crate::error::{ProcError, Result};
use crate::scheduler::policy::BurstTime;
use crate::sync::Channel;

/// Process ID type. Threads draw from the same sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Init process ID (always the first one handed out)
    pub const INIT: ProcessId = ProcessId(1);

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProcessState {
    /// Free slot
    #[default]
    Unused,
    /// Reserved, still being set up
    Embryo,
    /// Ready to run
    Runnable,
    /// Executing on a CPU
    Running,
    /// Blocked on a channel
    Sleeping,
    /// Finished, waiting to be reaped
    Zombie,
}

impl ProcessState {
    /// Short name used by `ps`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessState::Unused => "unused",
            ProcessState::Embryo => "embryo",
            ProcessState::Runnable => "runble",
            ProcessState::Running => "run",
            ProcessState::Sleeping => "sleep",
            ProcessState::Zombie => "zombie",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an entry owns its address space or shares its creator's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryKind {
    #[default]
    Process,
    Thread,
}

/// Generation-checked handle to a table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub(crate) index: u16,
    pub(crate) generation: u32,
}

impl SlotId {
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Control block of a process or thread.
pub struct Entry<M: MemoryManager> {
    pub(crate) state: ProcessState,
    pub(crate) generation: u32,
    pub(crate) pid: ProcessId,
    pub(crate) kind: EntryKind,
    /// Pid of the process whose address space the entry runs in.
    pub(crate) group: ProcessId,
    pub(crate) parent: Option<SlotId>,
    pub(crate) channel: Option<Channel>,
    pub(crate) killed: bool,
    pub(crate) exit_status: i32,
    pub(crate) burst: Option<BurstTime>,
    pub(crate) cpu_ticks: u64,
    pub(crate) switches: u64,
    pub(crate) name: String,
    pub(crate) vm: Option<Arc<AddressSpace<M>>>,
    pub(crate) kstack: Option<KernelStack>,
    pub(crate) user_stack: Option<StackRegion>,
}

impl<M: MemoryManager> Entry<M> {
    fn vacant(generation: u32) -> Self {
        Entry {
            state: ProcessState::Unused,
            generation,
            pid: ProcessId(0),
            kind: EntryKind::Process,
            group: ProcessId(0),
            parent: None,
            channel: None,
            killed: false,
            exit_status: 0,
            burst: None,
            cpu_ticks: 0,
            switches: 0,
            name: String::new(),
            vm: None,
            kstack: None,
            user_stack: None,
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store `name`, cut to at most [`PROC_NAME_LEN`] bytes on a char boundary.
    pub fn set_name(&mut self, name: &str) {
        let mut end = name.len().min(PROC_NAME_LEN);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.name.clear();
        self.name.push_str(&name[..end]);
    }

    /// Size of the address space, or 0 once it has been given up.
    pub fn memory_size(&self) -> usize {
        self.vm.as_ref().map_or(0, |vm| vm.size())
    }
}

/// Resources taken out of a reaped slot, disposed of after the lock is dropped.
pub struct Reclaimed<M: MemoryManager> {
    vm: Option<Arc<AddressSpace<M>>>,
    stack: Option<KernelStack>,
}

impl<M: MemoryManager> Reclaimed<M> {
    /// Release the address-space reference and free the kernel stack.
    pub fn dispose(self, mm: &M) {
        if let Some(vm) = self.vm {
            AddressSpace::release(vm, mm);
        }
        drop(self.stack);
    }
}

/// The table of all processes and threads.
pub struct ProcTable<M: MemoryManager> {
    entries: Vec<Entry<M>>,
    /// Index of live entries by pid
    by_pid: HashMap<ProcessId, u16>,
    next_pid: u32,
    root: Option<SlotId>,
}

impl<M: MemoryManager> ProcTable<M> {
    /// Create a table with `capacity` free slots.
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || Entry::vacant(0));
        ProcTable {
            entries,
            by_pid: HashMap::new(),
            next_pid: ProcessId::INIT.0,
            root: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Claim a free slot as EMBRYO with the next pid and the given kernel stack.
    pub fn reserve(&mut self, stack: KernelStack) -> Result<SlotId> {
        let index = self
            .entries
            .iter()
            .position(|e| e.state == ProcessState::Unused)
            .ok_or(ProcError::ResourceExhausted)?;

        // Pids are never reused, so running out of them is final.
        let next = self
            .next_pid
            .checked_add(1)
            .ok_or(ProcError::ResourceExhausted)?;
        let pid = ProcessId(self.next_pid);
        self.next_pid = next;

        let entry = &mut self.entries[index];
        let generation = entry.generation.wrapping_add(1);
        *entry = Entry::vacant(generation);
        entry.state = ProcessState::Embryo;
        entry.pid = pid;
        entry.group = pid;
        entry.kstack = Some(stack);

        self.by_pid.insert(pid, index as u16);
        Ok(SlotId { index: index as u16, generation })
    }

    /// Free a slot, handing back the resources it still holds.
    pub fn release(&mut self, id: SlotId) -> Reclaimed<M> {
        let entry = self.entry_mut(id);
        let pid = entry.pid;
        let reclaimed = Reclaimed {
            vm: entry.vm.take(),
            stack: entry.kstack.take(),
        };
        *entry = Entry::vacant(id.generation);
        self.by_pid.remove(&pid);
        reclaimed
    }

    /// Look up a live entry, `None` if the slot has been reused or freed.
    pub fn get(&self, id: SlotId) -> Option<&Entry<M>> {
        self.entries
            .get(id.index())
            .filter(|e| e.generation == id.generation && e.state != ProcessState::Unused)
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut Entry<M>> {
        self.entries
            .get_mut(id.index())
            .filter(|e| e.generation == id.generation && e.state != ProcessState::Unused)
    }

    /// Entry behind a handle the caller knows to be live.
    pub fn entry(&self, id: SlotId) -> &Entry<M> {
        match self.get(id) {
            Some(entry) => entry,
            None => panic!("stale process slot {:?}", id),
        }
    }

    pub fn entry_mut(&mut self, id: SlotId) -> &mut Entry<M> {
        match self.get_mut(id) {
            Some(entry) => entry,
            None => panic!("stale process slot {:?}", id),
        }
    }

    /// Handle of the live entry with `pid`.
    pub fn find(&self, pid: ProcessId) -> Option<SlotId> {
        let index = *self.by_pid.get(&pid)?;
        let entry = &self.entries[index as usize];
        Some(SlotId { index, generation: entry.generation })
    }

    /// Handle for whatever currently occupies `index`.
    pub fn slot_id(&self, index: usize) -> SlotId {
        SlotId {
            index: index as u16,
            generation: self.entries[index].generation,
        }
    }

    /// Live entries with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &Entry<M>)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.state != ProcessState::Unused)
            .map(|(index, e)| {
                (SlotId { index: index as u16, generation: e.generation }, e)
            })
    }

    /// Number of slots not UNUSED.
    pub fn live_count(&self) -> usize {
        self.by_pid.len()
    }

    /// Largest pid handed out so far.
    pub fn max_pid(&self) -> ProcessId {
        ProcessId(self.next_pid - 1)
    }

    pub fn root(&self) -> Option<SlotId> {
        self.root
    }

    pub fn set_root(&mut self, id: SlotId) {
        self.root = Some(id);
    }

    /// Pid of an entry's parent.
    pub fn parent_pid(&self, id: SlotId) -> Option<ProcessId> {
        let parent = self.get(id)?.parent?;
        self.get(parent).map(|p| p.pid)
    }

    /// Burst time of the entry at `index` if it is RUNNABLE.
    pub fn runnable_burst(&self, index: usize) -> Option<Option<BurstTime>> {
        let entry = &self.entries[index];
        (entry.state == ProcessState::Runnable).then_some(entry.burst)
    }

    /// Make every entry sleeping on `channel` RUNNABLE. Returns how many woke.
    pub fn wakeup(&mut self, channel: Channel) -> usize {
        let mut woken = 0;
        for entry in self.entries.iter_mut() {
            if entry.state == ProcessState::Sleeping && entry.channel == Some(channel) {
                entry.state = ProcessState::Runnable;
                woken += 1;
            }
        }
        woken
    }

    /// Hand every child of `from` to `to`. Returns whether any of them is a zombie.
    pub fn reparent_children(&mut self, from: SlotId, to: SlotId) -> bool {
        let mut zombie = false;
        for entry in self.entries.iter_mut() {
            if entry.state != ProcessState::Unused && entry.parent == Some(from) {
                entry.parent = Some(to);
                zombie |= entry.state == ProcessState::Zombie;
            }
        }
        zombie
    }
}
