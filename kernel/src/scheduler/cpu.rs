//! Per-CPU state and interrupt nesting.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::arch::Arch;
use crate::kernel::Kernel;
use crate::process::table::SlotId;

const NO_ENTRY: u64 = u64::MAX;

fn pack(id: Option<SlotId>) -> u64 {
    match id {
        Some(id) => (u64::from(id.generation) << 16) | u64::from(id.index),
        None => NO_ENTRY,
    }
}

fn unpack(raw: u64) -> Option<SlotId> {
    (raw != NO_ENTRY).then(|| SlotId {
        index: raw as u16,
        generation: (raw >> 16) as u32,
    })
}

/// State of one CPU.
pub struct Cpu<A: Arch> {
    id: usize,
    /// Context the scheduler loop of this CPU is suspended in.
    pub(crate) scheduler: UnsafeCell<A::Context>,
    current: AtomicU64,
    /// Depth of `push_off` nesting.
    noff: AtomicUsize,
    /// Whether interrupts were enabled before the outermost `push_off`.
    intena: AtomicBool,
    pub(crate) need_resched: AtomicBool,
    /// Ticks charged to the current entry since it was dispatched.
    pub(crate) slice_used: AtomicU64,
    /// Slot the next scan starts from.
    pub(crate) cursor: AtomicUsize,
}

// SAFETY: `scheduler` is only touched by this CPU's scheduler loop and by
// `switch` calls made with interrupts disabled on this CPU.
unsafe impl<A: Arch> Sync for Cpu<A> {}

impl<A: Arch> Cpu<A> {
    pub(crate) fn new(id: usize) -> Self {
        Cpu {
            id,
            scheduler: UnsafeCell::new(A::Context::default()),
            current: AtomicU64::new(NO_ENTRY),
            noff: AtomicUsize::new(0),
            intena: AtomicBool::new(false),
            need_resched: AtomicBool::new(false),
            slice_used: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Entry running on this CPU.
    pub(crate) fn current(&self) -> Option<SlotId> {
        unpack(self.current.load(Ordering::Acquire))
    }

    pub(crate) fn set_current(&self, id: Option<SlotId>) {
        self.current.store(pack(id), Ordering::Release);
    }

    pub(crate) fn depth(&self) -> usize {
        self.noff.load(Ordering::Relaxed)
    }

    pub(crate) fn intena(&self) -> bool {
        self.intena.load(Ordering::Relaxed)
    }

    pub(crate) fn set_intena(&self, enabled: bool) {
        self.intena.store(enabled, Ordering::Relaxed);
    }
}

/// Interrupts stay disabled on the CPU until this is dropped.
pub(crate) struct InterruptGuard<'a, A: Arch> {
    kernel: &'a Kernel<A>,
}

impl<A: Arch> Drop for InterruptGuard<'_, A> {
    fn drop(&mut self) {
        self.kernel.pop_off();
    }
}

impl<A: Arch> Kernel<A> {
    /// The executing CPU. Only stable while interrupts are disabled.
    pub(crate) fn this_cpu(&self) -> &Cpu<A> {
        let id = self.arch.cpu_id();
        match self.cpus.get(id) {
            Some(cpu) => cpu,
            None => panic!("cpu {} not configured", id),
        }
    }

    /// Disable interrupts, counting nesting so matched `pop_off`s restore them.
    pub(crate) fn push_off(&self) -> InterruptGuard<'_, A> {
        let enabled = self.arch.interrupts_enabled();
        self.arch.disable_interrupts();
        let cpu = self.this_cpu();
        if cpu.noff.load(Ordering::Relaxed) == 0 {
            cpu.intena.store(enabled, Ordering::Relaxed);
        }
        cpu.noff.fetch_add(1, Ordering::Relaxed);
        InterruptGuard { kernel: self }
    }

    pub(crate) fn pop_off(&self) {
        assert!(!self.arch.interrupts_enabled(), "pop_off: interruptible");
        let cpu = self.this_cpu();
        let depth = cpu.noff.load(Ordering::Relaxed);
        assert!(depth >= 1, "pop_off: unbalanced");
        cpu.noff.store(depth - 1, Ordering::Relaxed);
        if depth == 1 && cpu.intena.load(Ordering::Relaxed) {
            self.arch.enable_interrupts();
        }
    }

    /// Handle of the entry running on this CPU, if any.
    pub(crate) fn current(&self) -> Option<SlotId> {
        let _irq = self.push_off();
        self.this_cpu().current()
    }

    /// Handle of the calling entry. Calling this outside an entry is a kernel bug.
    pub(crate) fn current_slot(&self) -> SlotId {
        match self.current() {
            Some(id) => id,
            None => panic!("no current process"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_packing() {
        let id = SlotId { index: 513, generation: 70_000 };
        assert_eq!(unpack(pack(Some(id))), Some(id));
        assert_eq!(unpack(pack(None)), None);

        let max = SlotId { index: u16::MAX, generation: u32::MAX };
        assert_eq!(unpack(pack(Some(max))), Some(max));
    }
}
