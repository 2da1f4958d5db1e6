//! Error types for process management.

use core::fmt;

/// Failure of a process-management operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcError {
    /// Malformed request (bad burst time, misaligned stack, shrinking below zero).
    InvalidArgument,
    /// No live entry with the requested pid.
    NotFound,
    /// No free table slot, or the memory subsystem refused the request.
    ResourceExhausted,
    /// The caller has no child (or sibling thread) to wait for.
    LostChild,
    /// The caller was killed while blocked.
    Killed,
}

/// Linux errno values used on the system-call boundary.
pub mod errno {
    pub const ESRCH: isize = 3;
    pub const EINTR: isize = 4;
    pub const ECHILD: isize = 10;
    pub const EAGAIN: isize = 11;
    pub const EINVAL: isize = 22;
}

impl ProcError {
    /// Negative return value reported to user space.
    pub fn to_errno(self) -> isize {
        -match self {
            ProcError::InvalidArgument => errno::EINVAL,
            ProcError::NotFound => errno::ESRCH,
            ProcError::ResourceExhausted => errno::EAGAIN,
            ProcError::LostChild => errno::ECHILD,
            ProcError::Killed => errno::EINTR,
        }
    }

    /// Decode a negative system-call return value.
    pub fn from_errno(value: isize) -> Option<Self> {
        match -value {
            errno::EINVAL => Some(ProcError::InvalidArgument),
            errno::ESRCH => Some(ProcError::NotFound),
            errno::EAGAIN => Some(ProcError::ResourceExhausted),
            errno::ECHILD => Some(ProcError::LostChild),
            errno::EINTR => Some(ProcError::Killed),
            _ => None,
        }
    }
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcError::InvalidArgument => write!(f, "invalid argument"),
            ProcError::NotFound => write!(f, "no such process"),
            ProcError::ResourceExhausted => write!(f, "resource exhausted"),
            ProcError::LostChild => write!(f, "no child processes"),
            ProcError::Killed => write!(f, "interrupted by kill"),
        }
    }
}

/// Result type for process-management operations.
pub type Result<T> = core::result::Result<T, ProcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping_is_reversible() {
        let all = [
            ProcError::InvalidArgument,
            ProcError::NotFound,
            ProcError::ResourceExhausted,
            ProcError::LostChild,
            ProcError::Killed,
        ];
        for err in all {
            assert!(err.to_errno() < 0);
            assert_eq!(ProcError::from_errno(err.to_errno()), Some(err));
        }
        assert_eq!(ProcError::from_errno(-1), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(alloc::format!("{}", ProcError::LostChild), "no child processes");
    }
}
