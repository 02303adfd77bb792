//! forkos kernel/userland ABI types.
//!
//! Canonical definitions for everything that crosses the privilege boundary:
//! addresses, the user address-space layout, trap numbers, the saved context
//! snapshot and the fault-context record delivered to user fault handlers,
//! environment identities, and syscall numbers and error codes.
//!
//! Every type that is laid out in memory is `#[repr(C)]`.

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

pub mod addr;
pub mod env;
pub mod error;
pub mod memlayout;
pub mod syscall;
pub mod trap;
pub mod trapframe;

/// Standard 4KB page size.
pub const PAGE_SIZE: u64 = 0x1000;

pub use addr::{PhysAddr, VirtAddr};
pub use env::{EnvId, EnvStatus};
pub use error::KernError;
pub use trapframe::{PushRegs, Trapframe, UTrapframe};
