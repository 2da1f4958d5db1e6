//! Kernel Unit Tests Module
//!
//! Scenario tests that boot a hosted kernel and drive it from user programs.

mod common;
mod info_tests;
mod scheduler_tests;
mod sync_tests;
mod thread_tests;
