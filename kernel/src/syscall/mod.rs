//! System call handling module.
//!
//! Handlers for the process-management system calls. Each handler takes the
//! kernel and already-decoded arguments (the trap entry owns register and
//! user-pointer decoding) and returns the value placed in the user's return
//! register: a non-negative result, or a negative errno.
//!
//! After a handler returns, the trap exit path must call
//! [`Kernel::user_return`](crate::Kernel::user_return).

pub mod handlers;

pub use handlers::*;

use crate::error::Result;

/// Year reported by `getyear`.
pub const YEAR: isize = 2023;

/// Fold a handler result into a return register value.
pub(crate) fn to_return(result: Result<usize>) -> isize {
    match result {
        Ok(value) => value as isize,
        Err(err) => err.to_errno(),
    }
}
