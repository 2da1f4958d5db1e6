use core::ops::{Deref, DerefMut};
use spin::{Mutex, MutexGuard};

use super::Channel;
use crate::arch::{Arch, MemoryManager};
use crate::error::{ProcError, Result};
use crate::kernel::Kernel;
use crate::process::table::{ProcTable, SlotId};
use crate::scheduler::cpu::InterruptGuard;

/// Lock-protected state together with the channel its waiters sleep on.
///
/// Sleeping is only possible through a [`ConditionGuard`] of this condition,
/// so a waiter always releases the lock that protects the state it checked.
pub struct Condition<T> {
    lock: Mutex<T>,
    channel: Channel,
}

impl<T> Condition<T> {
    pub const fn new(value: T, channel: Channel) -> Self {
        Condition {
            lock: Mutex::new(value),
            channel,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Lock the state, disabling interrupts on this CPU until the guard drops.
    pub fn lock<'a, A: Arch>(&'a self, kernel: &'a Kernel<A>) -> ConditionGuard<'a, A, T> {
        let irq = kernel.push_off();
        ConditionGuard {
            guard: self.lock.lock(),
            _irq: irq,
            condition: self,
            kernel,
        }
    }

    /// Wake everything sleeping on this condition.
    pub fn notify_all<A: Arch>(&self, kernel: &Kernel<A>) {
        kernel.wakeup(self.channel);
    }
}

/// Held lock of a [`Condition`].
pub struct ConditionGuard<'a, A: Arch, T> {
    guard: MutexGuard<'a, T>,
    _irq: InterruptGuard<'a, A>,
    condition: &'a Condition<T>,
    kernel: &'a Kernel<A>,
}

impl<'a, A: Arch, T> ConditionGuard<'a, A, T> {
    /// Release the lock, sleep until the channel is signalled, re-lock.
    ///
    /// Wakeups can be spurious; callers re-check their predicate.
    pub fn sleep(self) -> Self {
        let ConditionGuard {
            guard,
            _irq,
            condition,
            kernel,
        } = self;
        // Table lock first: a wakeup issued after the state lock is gone
        // still finds us SLEEPING.
        let table = kernel.lock_table();
        drop(guard);
        drop(_irq);
        drop(kernel.sleep_locked(table, condition.channel));
        condition.lock(kernel)
    }

    /// Sleep while `condition` holds, giving up with `Killed` once `token` fires.
    pub fn wait_while<F>(mut self, token: &CancelToken, mut condition: F) -> Result<Self>
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut *self.guard) {
            if token.is_cancelled(self.kernel) {
                return Err(ProcError::Killed);
            }
            self = self.sleep();
        }
        Ok(self)
    }

    /// Wake the condition's waiters while still holding its lock.
    pub fn notify_all(&self) {
        self.kernel.wakeup(self.condition.channel);
    }
}

impl<A: Arch, T> Deref for ConditionGuard<'_, A, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<A: Arch, T> DerefMut for ConditionGuard<'_, A, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Cancellation observed at blocking points: set when the owner is killed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelToken {
    owner: SlotId,
}

impl CancelToken {
    pub(crate) fn new(owner: SlotId) -> Self {
        CancelToken { owner }
    }

    /// Whether the owner was killed. An owner that no longer exists counts as killed.
    pub fn is_cancelled<A: Arch>(&self, kernel: &Kernel<A>) -> bool {
        let table = kernel.lock_table();
        self.cancelled_in(&*table)
    }

    /// Same check for callers already holding the table lock.
    pub(crate) fn cancelled_in<M: MemoryManager>(&self, table: &ProcTable<M>) -> bool {
        table.get(self.owner).map_or(true, |e| e.killed)
    }
}
