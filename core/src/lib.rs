//! Exception dispatch: the gate table, the trap dispatcher, and the bridge
//! that reflects user page faults back to user-level handlers.

#![cfg_attr(not(test), no_std)]

#[cfg(target_arch = "x86_64")]
pub mod arch;
pub mod cpu;
pub mod idt;
pub mod services;
pub mod trap;
pub mod upcall;

pub use cpu::{CpuContext, CpuStatus, MAX_CPUS, TrapStack};
pub use idt::{EntryStubs, Idt, IdtError, idt_init};
pub use services::{AddressSpaces, EnvTable, Kernel, Monitor, Platform, SyscallDispatch};
pub use trap::{KERNEL, KernelState, TrapExit, trap};
pub use upcall::{FaultRecordSlot, UpcallError, page_fault_handler, place_fault_record};
