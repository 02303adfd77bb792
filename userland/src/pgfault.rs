//! User-level copy-on-write fault handler.

use core::fmt;

use forkos_abi::memlayout::{PFTEMP, UXSTACK_BASE};
use forkos_abi::{EnvId, KernError, UTrapframe, VirtAddr};
use forkos_mm::{FaultErrorCode, PageFlags, promoted_flags};

use crate::syscall::{SysResult, Syscalls};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CowFaultError {
    /// The faulting access was a read or an instruction fetch.
    NotWrite { va: VirtAddr, err: u64 },
    /// The page is not mapped at all.
    NotMapped { va: VirtAddr },
    /// The page is mapped but not copy-on-write.
    NotCow { va: VirtAddr, flags: PageFlags },
    Alloc(KernError),
    Map(KernError),
    Unmap(KernError),
}

impl fmt::Display for CowFaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotWrite { va, err } => {
                write!(f, "fault at {:#x} is not a write (err {:#x})", va.as_u64(), err)
            }
            Self::NotMapped { va } => write!(f, "fault at {:#x} on an unmapped page", va.as_u64()),
            Self::NotCow { va, flags } => write!(
                f,
                "write fault at {:#x} on a page that is not copy-on-write ({:#x})",
                va.as_u64(),
                flags.bits()
            ),
            Self::Alloc(e) => write!(f, "page_alloc: {}", e),
            Self::Map(e) => write!(f, "page_map: {}", e),
            Self::Unmap(e) => write!(f, "page_unmap: {}", e),
        }
    }
}

/// Replace the copy-on-write page behind a write fault with a private,
/// writable copy.
///
/// The copy is built at [`PFTEMP`], moved over the faulting page, and the
/// scratch mapping is removed again.
pub fn pgfault<S>(sys: &mut S, utf: &UTrapframe) -> Result<(), CowFaultError>
where
    S: Syscalls + ?Sized,
{
    let va = utf.fault_va();
    let err = FaultErrorCode::from_raw(utf.err);
    if !err.contains(FaultErrorCode::WRITE) {
        return Err(CowFaultError::NotWrite { va, err: utf.err });
    }

    let pte = sys
        .walk(va)
        .present()
        .ok_or(CowFaultError::NotMapped { va })?;
    let flags = pte.flags();
    if !flags.contains(PageFlags::COW) {
        return Err(CowFaultError::NotCow { va, flags });
    }

    let page = va.page_base();
    sys.page_alloc(EnvId::SELF, PFTEMP, PageFlags::USER_RW)
        .map_err(CowFaultError::Alloc)?;
    sys.copy_page(page, PFTEMP);
    sys.page_map(EnvId::SELF, PFTEMP, EnvId::SELF, page, promoted_flags(flags))
        .map_err(CowFaultError::Map)?;
    sys.page_unmap(EnvId::SELF, PFTEMP)
        .map_err(CowFaultError::Unmap)?;
    Ok(())
}

/// Entry from the upcall trampoline. A fault the handler cannot resolve is
/// a bug in the faulting program.
pub fn handle_upcall<S>(sys: &mut S, utf: &UTrapframe)
where
    S: Syscalls + ?Sized,
{
    if let Err(e) = pgfault(sys, utf) {
        panic!(
            "[{}] pgfault: {} (ip {:#x})",
            sys.getenvid(),
            e,
            utf.rip
        );
    }
}

/// Make sure the caller has an exception stack and the fault handler
/// installed. Only the first call does any work.
pub fn set_pgfault_handler<S>(sys: &mut S) -> SysResult
where
    S: Syscalls + ?Sized,
{
    if sys.this_upcall().is_some() {
        return Ok(());
    }
    sys.page_alloc(EnvId::SELF, UXSTACK_BASE, PageFlags::USER_RW)?;
    let entry = sys.upcall_entry();
    sys.env_set_pgfault_upcall(EnvId::SELF, entry)
}
