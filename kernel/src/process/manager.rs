//! Process Manager
//!
//! Creation, termination and reaping of processes.

use alloc::sync::Arc;

use super::address_space::AddressSpace;
use super::context::{EntryPoint, KernelStack};
use super::table::{EntryKind, ProcessId, ProcessState, Reclaimed, SlotId};
use crate::arch::{Arch, MemoryManager};
use crate::error::{ProcError, Result};
use crate::kernel::{Kernel, TableGuard};
use crate::sync::Channel;

type Space<A> = <<A as Arch>::Memory as MemoryManager>::Space;

/// First code every new entry runs.
fn entry_trampoline<A: Arch>(kernel: usize) -> ! {
    // SAFETY: `allocate` passes the address of a `&'static Kernel<A>`.
    let kernel: &'static Kernel<A> = unsafe { &*(kernel as *const Kernel<A>) };
    kernel.fork_return()
}

impl<A: Arch> Kernel<A> {
    /// Reserve an EMBRYO slot with a kernel stack and a context that starts
    /// in `fork_return`.
    pub(crate) fn allocate(&'static self) -> Result<SlotId> {
        let stack = KernelStack::try_new(self.config.kernel_stack_size)?;
        let stack_top = stack.top();
        let id = self.lock_table().reserve(stack).map_err(|err| {
            log::warn!("[PROC] no free process slot");
            err
        })?;

        let entry = EntryPoint {
            func: entry_trampoline::<A>,
            arg: self as *const Self as usize,
        };
        // SAFETY: the slot is EMBRYO, nothing else touches its context.
        let context = unsafe { &mut *self.slot(id).context.get() };
        if let Err(err) = self.arch.init_context(context, stack_top, entry) {
            self.discard(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Return an EMBRYO slot that never ran.
    pub(crate) fn discard(&self, id: SlotId) {
        let reclaimed = {
            let mut table = self.lock_table();
            // SAFETY: EMBRYO slot, table lock held.
            unsafe { self.slot(id).reset() };
            table.release(id)
        };
        reclaimed.dispose(self.arch.memory());
    }

    /// Free a ZOMBIE slot. Its resources are disposed of once the lock is dropped.
    pub(crate) fn reap(&self, table: &mut TableGuard<'_, A>, id: SlotId) -> Reclaimed<A::Memory> {
        assert_eq!(table.entry(id).state, ProcessState::Zombie, "reap: not a zombie");
        // SAFETY: a ZOMBIE seen under the table lock has finished its last switch.
        unsafe { self.slot(id).reset() };
        table.release(id)
    }

    /// Where every entry starts: drop the lock the scheduler handed over,
    /// then enter user mode.
    pub(crate) fn fork_return(&'static self) -> ! {
        // SAFETY: first resume of this context, coming from the scheduler.
        unsafe { self.release_handoff() };
        let me = self.current_slot();
        // SAFETY: our own trap frame.
        let frame = unsafe { (*self.slot(me).trapframe.get()).clone() };
        A::enter_user(self, frame)
    }

    /// Create the first process, the root of the process tree.
    pub fn user_init(
        &'static self,
        name: &str,
        frame: A::TrapFrame,
        image_size: usize,
    ) -> Result<ProcessId> {
        if self.lock_table().root().is_some() {
            return Err(ProcError::InvalidArgument);
        }
        let mm = self.arch.memory();
        let vm = AddressSpace::new(mm.allocate(image_size)?, image_size);
        let id = match self.allocate() {
            Ok(id) => id,
            Err(err) => {
                AddressSpace::release(vm, mm);
                return Err(err);
            }
        };
        // SAFETY: EMBRYO slot.
        unsafe { *self.slot(id).trapframe.get() = frame };

        let mut table = self.lock_table();
        table.set_root(id);
        let entry = table.entry_mut(id);
        entry.set_name(name);
        entry.vm = Some(vm);
        entry.state = ProcessState::Runnable;
        log::info!("[PROC] init: pid {} ({})", entry.pid, entry.name);
        Ok(entry.pid)
    }

    /// Duplicate the calling process. The child gets a copy of the address
    /// space and registers, with 0 as its return value, and is RUNNABLE.
    pub fn fork(&'static self) -> Result<ProcessId> {
        let parent = self.current_slot();
        let child = self.allocate()?;

        let mm = self.arch.memory();
        let copied = self.current_vm().and_then(|vm| {
            let copy = vm.duplicate(mm);
            AddressSpace::release(vm, mm);
            copy
        });
        let vm = match copied {
            Ok(vm) => vm,
            Err(err) => {
                log::warn!("[PROC] fork: address space copy failed: {}", err);
                self.discard(child);
                return Err(ProcError::ResourceExhausted);
            }
        };

        // SAFETY: the parent frame is our own, the child slot is EMBRYO.
        unsafe {
            let frame = (*self.slot(parent).trapframe.get()).clone();
            let child_frame = &mut *self.slot(child).trapframe.get();
            *child_frame = frame;
            A::set_return_value(child_frame, 0);
        }

        let mut table = self.lock_table();
        let (parent_pid, name) = {
            let p = table.entry(parent);
            (p.pid, p.name.clone())
        };
        let entry = table.entry_mut(child);
        entry.name = name;
        entry.vm = Some(vm);
        entry.parent = Some(parent);
        entry.kind = EntryKind::Process;
        entry.state = ProcessState::Runnable;
        log::debug!("[PROC] fork: pid {} -> pid {}", parent_pid, entry.pid);
        Ok(entry.pid)
    }

    /// Terminate the calling process with `status`. Never returns.
    pub fn exit(&self, status: i32) -> ! {
        let me = self.current_slot();
        if self.lock_table().root() == Some(me) {
            panic!("init exiting");
        }
        self.terminate(me, status, false)
    }

    /// Shared tail of `exit` and `thread_exit`.
    pub(crate) fn terminate(&self, me: SlotId, status: i32, drop_vm: bool) -> ! {
        if drop_vm {
            let vm = self.lock_table().entry_mut(me).vm.take();
            if let Some(vm) = vm {
                AddressSpace::release(vm, self.arch.memory());
            }
        }

        let mut table = self.lock_table();
        let root = match table.root() {
            Some(root) => root,
            None => panic!("exit without init"),
        };
        if table.reparent_children(me, root) {
            let root_pid = table.entry(root).pid;
            table.wakeup(Channel::Process(root_pid));
        }
        if let Some(parent_pid) = table.parent_pid(me) {
            table.wakeup(Channel::Process(parent_pid));
        }
        let (kind, group) = {
            let entry = table.entry(me);
            (entry.kind, entry.group)
        };
        if kind == EntryKind::Thread {
            table.wakeup(Channel::ThreadGroup(group));
        }

        let entry = table.entry_mut(me);
        entry.exit_status = status;
        entry.state = ProcessState::Zombie;
        log::debug!("[PROC] exit: pid {} status {}", entry.pid, status);

        self.sched(table, me);
        panic!("zombie exit");
    }

    /// Wait for a child process to exit and reap it.
    ///
    /// Returns the child's pid and exit status, `LostChild` if there is no
    /// child to wait for, or `Killed` if the caller is killed while waiting.
    /// Threads of the caller's own group are left to `thread_join`.
    pub fn wait(&self) -> Result<(ProcessId, i32)> {
        let me = self.current_slot();
        let token = self.cancel_token();
        let mut table = self.lock_table();
        loop {
            let (pid, group) = {
                let entry = table.entry(me);
                (entry.pid, entry.group)
            };

            let mut have_kids = false;
            let mut zombie = None;
            for (id, child) in table.iter() {
                if child.parent != Some(me)
                    || (child.kind == EntryKind::Thread && child.group == group)
                {
                    continue;
                }
                have_kids = true;
                if child.state == ProcessState::Zombie {
                    zombie = Some((id, child.pid, child.exit_status));
                    break;
                }
            }

            if let Some((id, child, status)) = zombie {
                let reclaimed = self.reap(&mut table, id);
                drop(table);
                reclaimed.dispose(self.arch.memory());
                log::debug!("[PROC] wait: pid {} reaped pid {}", pid, child);
                return Ok((child, status));
            }
            if !have_kids {
                return Err(ProcError::LostChild);
            }
            if token.cancelled_in(&*table) {
                return Err(ProcError::Killed);
            }
            table = self.sleep_locked(table, Channel::Process(pid));
        }
    }

    /// Mark `pid` as killed. A sleeping target is made RUNNABLE so it notices
    /// at its next check; killing a ZOMBIE has no effect.
    pub fn kill(&self, pid: ProcessId) -> Result<()> {
        let mut table = self.lock_table();
        let Some(id) = table.find(pid) else {
            log::warn!("[PROC] kill: no pid {}", pid);
            return Err(ProcError::NotFound);
        };
        let entry = table.entry_mut(id);
        if entry.state == ProcessState::Zombie {
            return Ok(());
        }
        entry.killed = true;
        if entry.state == ProcessState::Sleeping {
            entry.state = ProcessState::Runnable;
        }
        log::debug!("[PROC] kill: pid {}", pid);
        Ok(())
    }

    /// Pid of the caller.
    pub fn getpid(&self) -> ProcessId {
        let me = self.current_slot();
        self.lock_table().entry(me).pid
    }

    /// Grow (or shrink) the caller's address space by `delta` bytes.
    /// Returns the new size.
    pub fn growproc(&self, delta: isize) -> Result<usize> {
        self.resize_current(delta).map(|(_, new)| new)
    }

    /// Like [`Kernel::growproc`] but returns the size before the change.
    pub fn sbrk(&self, delta: isize) -> Result<usize> {
        self.resize_current(delta).map(|(old, _)| old)
    }

    fn resize_current(&self, delta: isize) -> Result<(usize, usize)> {
        let mm = self.arch.memory();
        let vm = self.current_vm()?;
        let result = vm.resize(mm, delta);
        AddressSpace::release(vm, mm);
        result
    }

    /// Run `f` on the caller's address space and its size.
    pub fn with_address_space<R>(&self, f: impl FnOnce(&mut Space<A>, usize) -> R) -> Result<R> {
        let vm = self.current_vm()?;
        let result = vm.with(f);
        AddressSpace::release(vm, self.arch.memory());
        Ok(result)
    }

    /// A new reference to the caller's address space.
    pub(crate) fn current_vm(&self) -> Result<Arc<AddressSpace<A::Memory>>> {
        let me = self.current_slot();
        self.lock_table()
            .entry(me)
            .vm
            .clone()
            .ok_or(ProcError::NotFound)
    }
}
