//! Execution context storage.
//!
//! Kernel stacks, user stack regions and the per-slot cells holding a
//! table entry's saved kernel context and trap frame.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;

use crate::arch::Arch;
use crate::config::PAGE_SIZE;
use crate::error::{ProcError, Result};

/// Where a freshly prepared context starts executing.
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    /// Function called on the new kernel stack.
    pub func: fn(usize) -> !,
    /// Its single argument.
    pub arg: usize,
}

/// A user-supplied stack for a new thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    /// Lowest user address of the region.
    pub base: usize,
    /// Length in bytes.
    pub len: usize,
}

impl StackRegion {
    /// One past the highest address; the initial stack pointer.
    pub fn top(&self) -> usize {
        self.base + self.len
    }

    /// Check that the region is page aligned and lies within `space_size` bytes.
    pub fn validate(&self, space_size: usize) -> Result<()> {
        if self.len == 0 || self.base % PAGE_SIZE != 0 {
            return Err(ProcError::InvalidArgument);
        }
        match self.base.checked_add(self.len) {
            Some(end) if end <= space_size => Ok(()),
            _ => Err(ProcError::InvalidArgument),
        }
    }
}

/// Kernel stack owned by a table entry.
pub struct KernelStack {
    memory: Box<[u8]>,
}

impl KernelStack {
    /// Allocate a zeroed stack, failing instead of aborting when memory is short.
    pub fn try_new(size: usize) -> Result<Self> {
        let mut memory = Vec::new();
        memory
            .try_reserve_exact(size)
            .map_err(|_| ProcError::ResourceExhausted)?;
        memory.resize(size, 0);
        Ok(KernelStack {
            memory: memory.into_boxed_slice(),
        })
    }

    /// Highest address of the stack (stacks grow down).
    pub fn top(&self) -> usize {
        self.memory.as_ptr() as usize + self.memory.len()
    }

    pub fn size(&self) -> usize {
        self.memory.len()
    }
}

/// Saved context and trap frame of one table slot.
///
/// Kept outside the table lock. The context is written only while the slot is
/// EMBRYO, by `switch` on behalf of the entry itself, or while reaping with the
/// table lock held. The trap frame is written only by the entry itself or while
/// the slot is EMBRYO.
pub(crate) struct Slot<A: Arch> {
    pub(crate) context: UnsafeCell<A::Context>,
    pub(crate) trapframe: UnsafeCell<A::TrapFrame>,
}

// SAFETY: access follows the ownership rules documented on `Slot`.
unsafe impl<A: Arch> Sync for Slot<A> {}

impl<A: Arch> Slot<A> {
    pub(crate) fn new() -> Self {
        Slot {
            context: UnsafeCell::new(A::Context::default()),
            trapframe: UnsafeCell::new(A::TrapFrame::default()),
        }
    }

    /// Drop whatever the slot's previous occupant left behind.
    ///
    /// # Safety
    ///
    /// The table lock must be held and the slot must be ZOMBIE (switched away
    /// for the last time) or EMBRYO.
    pub(crate) unsafe fn reset(&self) {
        // SAFETY: no one else touches the cells, per the caller's contract.
        unsafe {
            *self.context.get() = A::Context::default();
            *self.trapframe.get() = A::TrapFrame::default();
        }
    }
}
