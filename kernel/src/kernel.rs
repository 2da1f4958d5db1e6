//! Kernel instance.
//!
//! [`Kernel`] ties together the process table, the per-slot execution
//! contexts, the per-CPU scheduler state and the tick counter for one
//! platform. Operations are implemented next to the subsystem they belong to
//! (`process`, `scheduler`, `sync`) as further `impl Kernel` blocks.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::mem;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use spin::{Mutex, MutexGuard};

use crate::arch::Arch;
use crate::config::KernelConfig;
use crate::error::Result;
use crate::process::context::Slot;
use crate::process::table::{ProcTable, SlotId};
use crate::scheduler::cpu::{Cpu, InterruptGuard};
use crate::sync::{Channel, Condition};

/// One kernel: process table, CPUs and clock on top of platform `A`.
pub struct Kernel<A: Arch> {
    pub(crate) config: KernelConfig,
    pub(crate) arch: A,
    /// The table-wide lock.
    pub(crate) table: Mutex<ProcTable<A::Memory>>,
    pub(crate) slots: Box<[Slot<A>]>,
    pub(crate) cpus: Box<[Cpu<A>]>,
    /// Timer ticks since boot.
    pub(crate) ticks: Condition<u64>,
    running: AtomicBool,
}

impl<A: Arch> Kernel<A> {
    /// Build a kernel with an empty process table.
    pub fn new(config: KernelConfig, arch: A) -> Result<Self> {
        config.validate()?;

        let slots: Vec<Slot<A>> = (0..config.max_processes).map(|_| Slot::new()).collect();
        let cpus: Vec<Cpu<A>> = (0..config.cpus).map(Cpu::new).collect();

        log::info!(
            "[PROC] kernel: {} slots, {} cpus, time slice {} ticks",
            config.max_processes,
            config.cpus,
            config.time_slice_ticks
        );

        Ok(Kernel {
            table: Mutex::new(ProcTable::new(config.max_processes)),
            slots: slots.into_boxed_slice(),
            cpus: cpus.into_boxed_slice(),
            ticks: Condition::new(0, Channel::Ticks),
            running: AtomicBool::new(true),
            config,
            arch,
        })
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Ask every scheduler loop to return once its CPU is back in the scheduler.
    pub fn halt(&self) {
        log::info!("[SCHED] halt requested");
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Acquire the table lock with interrupts disabled on this CPU.
    pub(crate) fn lock_table(&self) -> TableGuard<'_, A> {
        let irq = self.push_off();
        TableGuard {
            guard: self.table.lock(),
            _irq: irq,
        }
    }

    /// Release a table lock that was handed over across a context switch.
    ///
    /// # Safety
    ///
    /// The calling execution must have just been resumed by `switch` from a
    /// side that handed the lock off with [`TableGuard::hand_off`].
    pub(crate) unsafe fn release_handoff(&self) {
        // SAFETY: the lock is held on our behalf by the handing-off side.
        unsafe { self.table.force_unlock() };
        self.pop_off();
    }

    pub(crate) fn slot(&self, id: SlotId) -> &Slot<A> {
        &self.slots[id.index()]
    }
}

/// Held table lock plus the interrupt-disable that came with it.
pub(crate) struct TableGuard<'a, A: Arch> {
    // Field order matters: the lock is released before interrupts come back.
    guard: MutexGuard<'a, ProcTable<A::Memory>>,
    _irq: InterruptGuard<'a, A>,
}

impl<'a, A: Arch> TableGuard<'a, A> {
    /// Leave the lock held and interrupts disabled for whoever is resumed next.
    pub(crate) fn hand_off(self) {
        let TableGuard { guard, _irq } = self;
        mem::forget(guard);
        mem::forget(_irq);
    }
}

impl<A: Arch> Deref for TableGuard<'_, A> {
    type Target = ProcTable<A::Memory>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<A: Arch> DerefMut for TableGuard<'_, A> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
