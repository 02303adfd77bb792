//! System-call interface seen by user-level fault handling and `fork`.
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`Syscalls`] | the kernel services `pgfault` and `fork` are written against |
//! | `raw` | `int 0x30` primitives and the hardware [`Syscalls`] implementation |
//! | [`SysResult`] | `Result` over [`KernError`] |

#[cfg(target_arch = "x86_64")]
pub mod raw;

use forkos_abi::{EnvId, EnvStatus, KernError, VirtAddr};
use forkos_mm::{PageFlags, PageWalk};

pub type SysResult<T = ()> = Result<T, KernError>;

/// Kernel services available to an environment.
///
/// Every `env` argument may be [`EnvId::SELF`] for the caller; otherwise it
/// must name the caller or one of its children.
pub trait Syscalls {
    fn getenvid(&self) -> EnvId;

    /// Allocate a zeroed page and map it at `va` in `env`.
    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PageFlags) -> SysResult;

    /// Map the frame behind `src_va` in `src_env` at `dst_va` in `dst_env`.
    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PageFlags,
    ) -> SysResult;

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> SysResult;

    /// Create a child with a copy of the caller's registers and an empty
    /// address space. Returns the child's id in the parent and
    /// [`EnvId::SELF`] in the child.
    fn exofork(&mut self) -> SysResult<EnvId>;

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult;

    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: VirtAddr) -> SysResult;

    // -- Address-space introspection (no kernel entry) ---------------------

    /// Look up `va` in the caller's own page tables.
    fn walk(&self, va: VirtAddr) -> PageWalk;

    /// Copy one page within the caller's address space.
    fn copy_page(&mut self, src: VirtAddr, dst: VirtAddr);

    /// Address of the assembly trampoline that runs the fault handler.
    fn upcall_entry(&self) -> VirtAddr;

    /// Fault-handler entry point currently registered for the caller.
    fn this_upcall(&self) -> Option<VirtAddr>;
}
