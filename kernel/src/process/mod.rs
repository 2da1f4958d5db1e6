//! Process Management
//!
//! The process table and the operations on it: process lifecycle
//! (`manager`), threads sharing an address space (`thread`) and read-only
//! reporting (`info`).

pub mod address_space;
pub mod context;
pub mod info;
pub mod manager;
pub mod table;
pub mod thread;

pub use address_space::AddressSpace;
pub use context::{EntryPoint, KernelStack, StackRegion};
pub use info::ProcInfo;
pub use table::{EntryKind, ProcessId, ProcessState, SlotId};
