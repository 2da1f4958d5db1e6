//! XKern process core.
//!
//! Process and thread management for a small SMP teaching kernel: the
//! process table with fork/exit/wait/kill, per-CPU scheduling with a
//! burst-time preference over round robin, sleep/wakeup on channels, threads
//! sharing an address space, and process information queries.
//!
//! The machine is reached through [`arch::Arch`]. With the `hosted` feature
//! (always enabled for tests) [`arch::hosted`] simulates CPUs and user
//! programs on host threads.

#![cfg_attr(not(any(test, feature = "hosted")), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod error;
pub mod kernel;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;

#[cfg(test)]
mod tests;

pub use config::KernelConfig;
pub use error::{ProcError, Result};
pub use kernel::Kernel;
pub use process::{ProcInfo, ProcessId, ProcessState};
pub use scheduler::policy::BurstTime;
pub use sync::{CancelToken, Channel, Condition};
