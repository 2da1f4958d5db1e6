//! Threads
//!
//! A thread is a table entry that shares its creator's address space instead
//! of owning a copy. Threads draw their ids from the pid sequence. Siblings
//! of one thread group reap each other with `thread_join`; the shared address
//! space goes back to the memory subsystem when its last holder lets go.

use super::address_space::AddressSpace;
use super::context::StackRegion;
use super::table::{EntryKind, ProcessId, ProcessState};
use crate::arch::Arch;
use crate::error::{ProcError, Result};
use crate::kernel::Kernel;
use crate::sync::Channel;

impl<A: Arch> Kernel<A> {
    /// Start a thread at user address `entry` with argument `arg`, running on
    /// the caller-provided `stack` inside the caller's address space.
    pub fn thread_create(
        &'static self,
        entry: usize,
        arg: usize,
        stack: StackRegion,
    ) -> Result<ProcessId> {
        let creator = self.current_slot();
        let mm = self.arch.memory();
        let vm = self.current_vm()?;
        if let Err(err) = stack.validate(vm.size()) {
            log::warn!("[THREAD] create: bad stack {:#x}+{:#x}", stack.base, stack.len);
            AddressSpace::release(vm, mm);
            return Err(err);
        }
        let child = match self.allocate() {
            Ok(id) => id,
            Err(err) => {
                AddressSpace::release(vm, mm);
                return Err(err);
            }
        };

        // SAFETY: the creator's frame is our own, the child slot is EMBRYO.
        let prepared = unsafe {
            let mut frame = (*self.slot(creator).trapframe.get()).clone();
            let result = self.arch.prepare_thread(&mut frame, entry, arg, stack);
            *self.slot(child).trapframe.get() = frame;
            result
        };
        if let Err(err) = prepared {
            AddressSpace::release(vm, mm);
            self.discard(child);
            return Err(err);
        }

        let mut table = self.lock_table();
        let (group, name) = {
            let c = table.entry(creator);
            (c.group, c.name.clone())
        };
        let thread = table.entry_mut(child);
        thread.kind = EntryKind::Thread;
        thread.group = group;
        thread.parent = Some(creator);
        thread.name = name;
        thread.vm = Some(vm);
        thread.user_stack = Some(stack);
        thread.state = ProcessState::Runnable;
        log::debug!("[THREAD] create: tid {} in group {}", thread.pid, group);
        Ok(thread.pid)
    }

    /// Wait for another thread of the caller's group to exit and reap it.
    ///
    /// Returns the reaped thread's id. `LostChild` if the group has no other
    /// thread, `Killed` if the caller is killed while waiting.
    pub fn thread_join(&self) -> Result<ProcessId> {
        let me = self.current_slot();
        let token = self.cancel_token();
        let mut table = self.lock_table();
        loop {
            let group = table.entry(me).group;

            let mut have_threads = false;
            let mut zombie = None;
            for (id, entry) in table.iter() {
                if id == me || entry.kind != EntryKind::Thread || entry.group != group {
                    continue;
                }
                have_threads = true;
                if entry.state == ProcessState::Zombie {
                    zombie = Some((id, entry.pid));
                    break;
                }
            }

            if let Some((id, tid)) = zombie {
                let reclaimed = self.reap(&mut table, id);
                drop(table);
                reclaimed.dispose(self.arch.memory());
                log::debug!("[THREAD] join: group {} reaped tid {}", group, tid);
                return Ok(tid);
            }
            if !have_threads {
                return Err(ProcError::LostChild);
            }
            if token.cancelled_in(&*table) {
                return Err(ProcError::Killed);
            }
            table = self.sleep_locked(table, Channel::ThreadGroup(group));
        }
    }

    /// Terminate the calling thread, dropping its address-space reference.
    pub fn thread_exit(&self) -> ! {
        let me = self.current_slot();
        if self.lock_table().root() == Some(me) {
            panic!("init exiting");
        }
        self.terminate(me, 0, true)
    }
}
