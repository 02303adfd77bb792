//! Host-side harness for the forkos trap path.
//!
//! Runs the real dispatcher, the page-fault bridge and the user-level
//! `fork` code against a simulated machine, and checks the behaviour a
//! running system depends on: frames persisted on entry, faults reflected
//! to user handlers, and copy-on-write isolation between parent and child.

pub mod log_capture;

#[cfg(test)]
mod fork_tests;
#[cfg(test)]
mod upcall_tests;

pub use log_capture::{capture_klog, klog_contains, take_klog};
pub use machine::{Env, Mapping, MONITOR_MARK, Sim, SimKernel, StoreError, UPCALL_ENTRY, UserEnv};
