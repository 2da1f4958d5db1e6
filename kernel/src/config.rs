//! Kernel configuration constants.
//!
//! This module contains compile-time limits for the process subsystem
//! and the runtime [`KernelConfig`] a kernel instance is built with.

use crate::error::{ProcError, Result};

/// Maximum number of CPUs supported.
pub const MAX_CPUS: usize = 8;

/// Maximum number of process table slots.
pub const MAX_PROCESSES: usize = 64;

/// Stack size per kernel execution context (4 KB).
pub const KERNEL_STACK_SIZE: usize = 4096;

/// Page size (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// User stack size handed to each thread (one page).
pub const USER_STACK_SIZE: usize = PAGE_SIZE;

/// Timer ticks a process without a burst time may run before preemption.
pub const TIME_SLICE_TICKS: u64 = 1;

/// Maximum length of a process name, in bytes.
pub const PROC_NAME_LEN: usize = 16;

/// Runtime configuration of a kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// Number of process table slots.
    pub max_processes: usize,
    /// Number of CPUs running the scheduler loop.
    pub cpus: usize,
    /// Kernel stack size for each table entry.
    pub kernel_stack_size: usize,
    /// Size of the user stack region a thread must be given.
    pub user_stack_size: usize,
    /// Preemption quantum for entries without a burst time.
    pub time_slice_ticks: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            max_processes: MAX_PROCESSES,
            cpus: 1,
            kernel_stack_size: KERNEL_STACK_SIZE,
            user_stack_size: USER_STACK_SIZE,
            time_slice_ticks: TIME_SLICE_TICKS,
        }
    }
}

impl KernelConfig {
    /// Set the number of CPUs.
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus;
        self
    }

    /// Set the number of process table slots.
    pub fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    /// Set the preemption quantum.
    pub fn with_time_slice(mut self, ticks: u64) -> Self {
        self.time_slice_ticks = ticks;
        self
    }

    /// Check that every limit is usable.
    pub fn validate(&self) -> Result<()> {
        if self.cpus == 0 || self.cpus > MAX_CPUS {
            log::warn!("[PROC] config: cpu count {} out of range", self.cpus);
            return Err(ProcError::InvalidArgument);
        }
        // Slot indices are kept in u16 handles.
        if self.max_processes == 0 || self.max_processes > u16::MAX as usize {
            log::warn!("[PROC] config: table size {} out of range", self.max_processes);
            return Err(ProcError::InvalidArgument);
        }
        if self.kernel_stack_size == 0 || self.user_stack_size == 0 || self.time_slice_ticks == 0 {
            return Err(ProcError::InvalidArgument);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = KernelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_processes, MAX_PROCESSES);
        assert_eq!(config.user_stack_size, PAGE_SIZE);
    }

    #[test]
    fn test_rejects_out_of_range_limits() {
        let config = KernelConfig::default();
        assert_eq!(config.with_cpus(0).validate(), Err(ProcError::InvalidArgument));
        assert_eq!(
            config.with_cpus(MAX_CPUS + 1).validate(),
            Err(ProcError::InvalidArgument)
        );
        assert_eq!(
            config.with_max_processes(0).validate(),
            Err(ProcError::InvalidArgument)
        );
        assert_eq!(config.with_time_slice(0).validate(), Err(ProcError::InvalidArgument));
    }
}
