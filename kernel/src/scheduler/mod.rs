//! Kernel scheduler module.
//!
//! Every CPU runs [`Kernel::run_scheduler`], which repeatedly picks a
//! RUNNABLE entry under the table lock, marks it RUNNING and switches to it.
//! The lock is handed across the switch: the entry releases it before doing
//! anything else, and takes it again when it gives the CPU back through
//! [`Kernel::sched`]. Preemption is requested from the timer interrupt and
//! acted upon on the way back to user mode.

pub mod cpu;
pub mod policy;

use core::sync::atomic::Ordering;

use crate::arch::Arch;
use crate::kernel::{Kernel, TableGuard};
use crate::process::table::{ProcessState, SlotId};
use policy::BurstTime;

impl<A: Arch> Kernel<A> {
    /// Scheduler loop of the calling CPU. Returns once the kernel is halted.
    pub fn run_scheduler(&self) {
        let cpu = self.this_cpu();
        cpu.set_current(None);
        log::info!("[SCHED] cpu {} scheduler started", cpu.id());

        while self.is_running() {
            // Let pending interrupts in between scans.
            self.arch.enable_interrupts();

            let mut table = self.lock_table();
            let start = cpu.cursor.load(Ordering::Relaxed);
            let pick = policy::pick_next(table.capacity(), start, |i| table.runnable_burst(i));
            let Some(index) = pick else {
                drop(table);
                self.arch.idle();
                continue;
            };

            let id = table.slot_id(index);
            {
                let entry = table.entry_mut(id);
                entry.state = ProcessState::Running;
                entry.switches += 1;
                log::trace!("[SCHED] cpu {}: run pid {} ({})", cpu.id(), entry.pid, entry.name);
            }
            cpu.cursor.store(index + 1, Ordering::Relaxed);
            cpu.slice_used.store(0, Ordering::Relaxed);
            cpu.need_resched.store(false, Ordering::Relaxed);
            cpu.set_current(Some(id));

            let from = cpu.scheduler.get();
            let to = self.slot(id).context.get();
            table.hand_off();
            // SAFETY: interrupts are disabled and the table lock travels with
            // the switch; the entry was RUNNABLE, so no other CPU resumes it.
            unsafe { self.arch.switch(from, to) };

            // Back with the table lock held by the entry that gave up the CPU.
            cpu.set_current(None);
            // SAFETY: resumed by `sched`, which handed the lock off.
            unsafe { self.release_handoff() };
        }

        log::info!("[SCHED] cpu {} scheduler stopped", cpu.id());
    }

    /// Switch from entry `me` back to this CPU's scheduler.
    ///
    /// `me` must already have left RUNNING and `table` must be the only lock
    /// held. Returns when the scheduler picks `me` again, without the lock.
    pub(crate) fn sched(&self, table: TableGuard<'_, A>, me: SlotId) {
        let cpu = self.this_cpu();
        assert_eq!(cpu.depth(), 1, "sched: locks held");
        assert!(
            table.entry(me).state != ProcessState::Running,
            "sched: still running"
        );
        assert!(!self.arch.interrupts_enabled(), "sched: interruptible");

        let intena = cpu.intena();
        let from = self.slot(me).context.get();
        let to = cpu.scheduler.get();
        table.hand_off();
        // SAFETY: interrupts are disabled, `from` is our own context and `to`
        // is the suspended scheduler of this CPU.
        unsafe { self.arch.switch(from, to) };

        // Possibly on a different CPU now.
        self.this_cpu().set_intena(intena);
        // SAFETY: the scheduler that resumed us handed the lock off.
        unsafe { self.release_handoff() };
    }

    /// Give up the CPU for one scheduling round.
    pub fn yield_now(&self) {
        let me = self.current_slot();
        let mut table = self.lock_table();
        table.entry_mut(me).state = ProcessState::Runnable;
        self.sched(table, me);
    }

    /// Advance the tick counter and wake tick sleepers.
    ///
    /// Called once per timer period by the CPU the platform designates.
    pub fn clock_tick(&self) {
        let mut ticks = self.ticks.lock(self);
        *ticks += 1;
        ticks.notify_all();
    }

    /// Per-CPU timer interrupt: charge the running entry and request
    /// preemption once an entry without a burst time used up its slice.
    pub fn timer_interrupt(&self) {
        let mut table = self.lock_table();
        let cpu = self.this_cpu();
        let Some(entry) = cpu.current().and_then(|id| table.get_mut(id)) else {
            return;
        };
        if entry.state != ProcessState::Running {
            return;
        }
        entry.cpu_ticks += 1;
        let used = cpu.slice_used.fetch_add(1, Ordering::Relaxed) + 1;
        if entry.burst.is_none() && used >= self.config.time_slice_ticks {
            cpu.need_resched.store(true, Ordering::Release);
        }
    }

    /// Checks made on every return to user mode: a killed entry exits with
    /// status -1, a preempted one yields.
    pub fn user_return(&self) {
        let me = self.current_slot();
        let killed = self.lock_table().entry(me).killed;
        if killed {
            self.exit(-1);
        }

        let preempt = {
            let _irq = self.push_off();
            self.this_cpu().need_resched.swap(false, Ordering::AcqRel)
        };
        if preempt {
            self.yield_now();
        }
    }

    /// Declare the caller's expected burst; `None` clears it.
    pub fn set_burst_time(&self, burst: Option<BurstTime>) {
        let me = self.current_slot();
        let mut table = self.lock_table();
        let entry = table.entry_mut(me);
        entry.burst = burst;
        log::debug!(
            "[SCHED] pid {} burst time {}",
            entry.pid,
            burst.map_or(0, |b| b.get())
        );
    }

    /// The caller's burst time, if set.
    pub fn burst_time(&self) -> Option<BurstTime> {
        let me = self.current_slot();
        self.lock_table().entry(me).burst
    }
}
