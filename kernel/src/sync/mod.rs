//! Sleep and wakeup.
//!
//! An entry blocks by recording a [`Channel`] and marking itself SLEEPING
//! while the table lock is held, then giving up its CPU. `wakeup` makes every
//! entry sleeping on a channel RUNNABLE. Because the sleeper holds the table
//! lock from the moment it commits to sleeping until its context is saved,
//! and `wakeup` needs that same lock, a wakeup cannot slip in between.
//!
//! Code that waits for state guarded by its own lock uses a [`Condition`],
//! which ties that lock to the channel it is signalled on.

mod condition;

pub use condition::{CancelToken, Condition, ConditionGuard};

use crate::arch::Arch;
use crate::error::Result;
use crate::kernel::{Kernel, TableGuard};
use crate::process::table::{ProcessId, ProcessState};

/// What a sleeping entry waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// The tick counter advanced.
    Ticks,
    /// A child of this process changed state.
    Process(ProcessId),
    /// A thread of this thread group exited.
    ThreadGroup(ProcessId),
    /// Arbitrary token chosen by the owner of a [`Condition`].
    Token(usize),
}

impl<A: Arch> Kernel<A> {
    /// Sleep on `channel` with the table lock held; returns with it re-acquired.
    pub(crate) fn sleep_locked<'a>(
        &'a self,
        mut table: TableGuard<'a, A>,
        channel: Channel,
    ) -> TableGuard<'a, A> {
        let me = self.current_slot();
        {
            let entry = table.entry_mut(me);
            entry.channel = Some(channel);
            entry.state = ProcessState::Sleeping;
        }
        self.sched(table, me);

        let mut table = self.lock_table();
        table.entry_mut(me).channel = None;
        table
    }

    /// Make every entry sleeping on `channel` RUNNABLE.
    pub fn wakeup(&self, channel: Channel) {
        let woken = self.lock_table().wakeup(channel);
        if woken > 0 {
            log::trace!("[SYNC] wakeup {:?}: {} entries", channel, woken);
        }
    }

    /// Token observing the calling entry's killed flag.
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken::new(self.current_slot())
    }

    /// Block the caller for `n` ticks. A kill ends the wait early with `Killed`.
    pub fn sleep_ticks(&self, n: u64) -> Result<()> {
        let token = self.cancel_token();
        let ticks = self.ticks.lock(self);
        let start = *ticks;
        ticks
            .wait_while(&token, |now| now.wrapping_sub(start) < n)
            .map(drop)
    }

    /// Ticks since boot.
    pub fn uptime(&self) -> u64 {
        *self.ticks.lock(self)
    }
}
