//! Platform boundary.
//!
//! Everything the process core needs from the machine goes through the
//! [`Arch`] trait: CPU identity, interrupt masking, creating and switching
//! kernel execution contexts, editing trap frames and entering user mode.
//! The address-space manager is reached through [`MemoryManager`].
//!
//! The only unsafe operation in the interface is [`Arch::switch`].

use core::fmt;

use crate::error::Result;
use crate::kernel::Kernel;
use crate::process::context::{EntryPoint, StackRegion};

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;

/// Machine interface used by the process core.
///
/// # Safety
///
/// Implementations must honour the contract of [`Arch::switch`]: saving into
/// `from` and later switching back to it resumes execution exactly after the
/// call, on whichever CPU performed the resume. `cpu_id` must be stable while
/// interrupts are disabled, and a context prepared by `init_context` must begin
/// execution in `entry.func(entry.arg)` the first time it is switched to.
pub unsafe trait Arch: Sized + Send + Sync + 'static {
    /// Saved kernel execution state of a suspended context.
    type Context: Default + Send;
    /// Saved user register state of a table entry.
    type TrapFrame: Clone + Default + Send;
    /// Address-space manager.
    type Memory: MemoryManager;

    /// The memory subsystem.
    fn memory(&self) -> &Self::Memory;

    /// Index of the executing CPU.
    fn cpu_id(&self) -> usize;

    /// Whether interrupts are enabled on the executing CPU.
    fn interrupts_enabled(&self) -> bool;

    /// Enable interrupts on the executing CPU.
    fn enable_interrupts(&self);

    /// Disable interrupts on the executing CPU.
    fn disable_interrupts(&self);

    /// Wait for something to happen when no entry is runnable.
    fn idle(&self);

    /// Prepare `context` so that its first resume calls `entry` on the
    /// kernel stack ending at `stack_top`.
    fn init_context(
        &self,
        context: &mut Self::Context,
        stack_top: usize,
        entry: EntryPoint,
    ) -> Result<()>;

    /// Suspend the current execution into `from` and resume `to`.
    ///
    /// # Safety
    ///
    /// Interrupts must be disabled. `from` must be the context of the caller's
    /// own execution and `to` a context that was either saved by an earlier
    /// `switch` or prepared by `init_context`, and that nothing else resumes
    /// concurrently. Neither pointer may be dereferenced by anyone else until
    /// the process table lock, handed across the switch, is released by the
    /// resumed side.
    unsafe fn switch(&self, from: *mut Self::Context, to: *const Self::Context);

    /// Store the value a system call returns to user mode.
    fn set_return_value(frame: &mut Self::TrapFrame, value: usize);

    /// Point a copied frame at a thread entry function, its argument and stack.
    fn prepare_thread(
        &self,
        frame: &mut Self::TrapFrame,
        entry: usize,
        arg: usize,
        stack: StackRegion,
    ) -> Result<()>;

    /// Return to user mode with `frame`.
    fn enter_user(kernel: &'static Kernel<Self>, frame: Self::TrapFrame) -> !;

    /// Diagnostic console output.
    fn console_write(&self, args: fmt::Arguments<'_>);
}

/// Address-space manager used by fork, growproc and reaping.
pub trait MemoryManager: Send + Sync + 'static {
    /// A user address space.
    type Space: Send;

    /// Create an address space of `size` bytes.
    fn allocate(&self, size: usize) -> Result<Self::Space>;

    /// Copy `src` (of `size` bytes) into a new address space.
    fn duplicate(&self, src: &Self::Space, size: usize) -> Result<Self::Space>;

    /// Grow or shrink `space` from `old_size` to `new_size`, returning the new size.
    fn resize(&self, space: &mut Self::Space, old_size: usize, new_size: usize) -> Result<usize>;

    /// Return `space` to the memory subsystem.
    fn release(&self, space: Self::Space, size: usize);
}
