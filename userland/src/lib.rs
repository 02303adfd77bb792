//! User-level half of forkos process duplication.
//!
//! Environments handle their own copy-on-write faults: the kernel reflects
//! a page fault to the handler in [`pgfault`], which copies the page with
//! ordinary system calls. [`fork`] and [`sfork`] build a child's address
//! space out of the same calls.

#![cfg_attr(not(test), no_std)]

pub mod fork;
pub mod pgfault;
pub mod syscall;

pub use fork::{ForkError, ForkResult, duppage, fork, sfork};
pub use pgfault::{CowFaultError, handle_upcall, pgfault, set_pgfault_handler};
pub use syscall::{SysResult, Syscalls};
