//! Kernel collaborators consumed by the trap dispatcher and the page-fault
//! bridge.
//!
//! The environment table, the address-space service, the device layer, the
//! system-call handlers and the monitor live outside this crate. They are
//! handed to [`crate::trap::trap`] as one explicit context implementing
//! [`Kernel`].

use forkos_abi::syscall::SYSCALL_ARGS;
use forkos_abi::{EnvId, EnvStatus, Trapframe, VirtAddr};
use forkos_mm::{MmResult, PageWalk};

pub trait EnvTable {
    /// `None` if `env` does not name a live environment.
    fn env_status(&self, env: EnvId) -> Option<EnvStatus>;
    /// The saved context slot of `env`.
    fn env_frame(&self, env: EnvId) -> Option<&Trapframe>;
    fn env_frame_mut(&mut self, env: EnvId) -> Option<&mut Trapframe>;
    /// Registered user fault-handler entry point, if any.
    fn pgfault_upcall(&self, env: EnvId) -> Option<VirtAddr>;
    /// Reclaim an environment that was marked dying.
    fn env_free(&mut self, env: EnvId);
    /// Destroy `env`. An environment currently running on another CPU is
    /// only marked dying.
    fn env_destroy(&mut self, env: EnvId);
}

pub trait AddressSpaces {
    fn lookup(&self, env: EnvId, va: VirtAddr) -> PageWalk;
    /// Store `bytes` at `va` in the address space of `env`.
    fn copy_to_user(&mut self, env: EnvId, va: VirtAddr, bytes: &[u8]) -> MmResult;
}

pub trait Platform {
    // -- CPU --------------------------------------------------------------
    /// Faulting linear address of the last page fault (CR2).
    fn fault_address(&self) -> u64;
    fn interrupts_enabled(&self) -> bool;

    // -- Devices ----------------------------------------------------------
    fn lapic_eoi(&mut self);
    fn kbd_intr(&mut self);
    fn serial_intr(&mut self);
}

pub trait SyscallDispatch {
    /// Run system call `number` for `caller` and return the raw result.
    ///
    /// A handler that gives up the CPU leaves the caller runnable; one that
    /// destroys the caller leaves it not running. Either way the dispatcher
    /// hands control back to the scheduler instead of resuming.
    fn syscall(&mut self, caller: EnvId, number: u64, args: [u64; SYSCALL_ARGS]) -> i64;
}

pub trait Monitor {
    fn monitor(&mut self, tf: &mut Trapframe);
}

/// Everything the dispatcher needs.
pub trait Kernel: EnvTable + AddressSpaces + Platform + SyscallDispatch + Monitor {}

impl<T> Kernel for T where T: EnvTable + AddressSpaces + Platform + SyscallDispatch + Monitor + ?Sized
{}
