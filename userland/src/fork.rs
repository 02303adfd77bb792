//! `fork` and `sfork` built from user-level primitives.
//!
//! Both walk the caller's address space below [`USER_TOP`], skip unmapped
//! page tables in one step, and give the child a fresh exception-stack page.
//! `fork` makes every writable page copy-on-write; `sfork` shares everything
//! except the top stack page, so parent and child behave like threads with
//! private stacks.

use core::fmt;

use forkos_abi::memlayout::{USER_TOP, USTACK_PAGE, UXSTACK_BASE};
use forkos_abi::{EnvId, EnvStatus, KernError, PAGE_SIZE, VirtAddr};
use forkos_mm::{Duplication, MmError, PageFlags, PageWalk, duplication_for, sharing_for};

use crate::pgfault::set_pgfault_handler;
use crate::syscall::Syscalls;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkResult {
    Parent { child: EnvId },
    Child,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForkError {
    SetHandler(KernError),
    Exofork(KernError),
    ExceptionStack(KernError),
    /// The page's flags cannot be duplicated.
    BadPage { va: VirtAddr, err: MmError },
    Map { va: VirtAddr, err: KernError },
    SetUpcall(KernError),
    SetStatus(KernError),
}

impl fmt::Display for ForkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetHandler(e) => write!(f, "installing fault handler: {}", e),
            Self::Exofork(e) => write!(f, "exofork: {}", e),
            Self::ExceptionStack(e) => write!(f, "child exception stack: {}", e),
            Self::BadPage { va, err } => write!(f, "page {:#x}: {}", va.as_u64(), err),
            Self::Map { va, err } => write!(f, "mapping page {:#x}: {}", va.as_u64(), err),
            Self::SetUpcall(e) => write!(f, "child fault handler: {}", e),
            Self::SetStatus(e) => write!(f, "starting child: {}", e),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Sharing {
    CopyOnWrite,
    Shared,
}

/// Map the page at `va` into `child`.
///
/// Writable and copy-on-write pages become copy-on-write in the child first
/// and in the caller second, so the caller cannot write the page between
/// the two steps while the child already sees it as a frozen snapshot.
///
/// # Panics
///
/// Panics if the page table covering `va` does not exist.
pub fn duppage<S>(sys: &mut S, child: EnvId, va: VirtAddr) -> Result<(), ForkError>
where
    S: Syscalls + ?Sized,
{
    let pte = match sys.walk(va) {
        PageWalk::Missing { level } => {
            panic!("duppage: no {} entry for {:#x}", level, va.as_u64())
        }
        PageWalk::Leaf(pte) => pte,
    };
    if !pte.is_present() {
        return Ok(());
    }

    let map_err = |err| ForkError::Map { va, err };
    match duplication_for(pte.flags()).map_err(|err| ForkError::BadPage { va, err })? {
        Duplication::Share(flags) => {
            sys.page_map(EnvId::SELF, va, child, va, flags).map_err(map_err)?;
        }
        Duplication::CopyOnWrite(flags) => {
            sys.page_map(EnvId::SELF, va, child, va, flags).map_err(map_err)?;
            sys.page_map(EnvId::SELF, va, EnvId::SELF, va, flags).map_err(map_err)?;
        }
    }
    Ok(())
}

fn share_page<S>(sys: &mut S, child: EnvId, va: VirtAddr, flags: PageFlags) -> Result<(), ForkError>
where
    S: Syscalls + ?Sized,
{
    let (_, dup) = sharing_for(flags).map_err(|err| ForkError::BadPage { va, err })?;
    sys.page_map(EnvId::SELF, va, child, va, dup.flags())
        .map_err(|err| ForkError::Map { va, err })
}

fn duplicate_address_space<S>(sys: &mut S, child: EnvId, sharing: Sharing) -> Result<(), ForkError>
where
    S: Syscalls + ?Sized,
{
    let mut va = VirtAddr::NULL;
    while va < USER_TOP {
        if va == UXSTACK_BASE {
            sys.page_alloc(child, UXSTACK_BASE, PageFlags::USER_RW)
                .map_err(ForkError::ExceptionStack)?;
            va = va.offset(PAGE_SIZE);
            continue;
        }

        let walk = sys.walk(va);
        if let Some(pte) = walk.present() {
            match sharing {
                Sharing::Shared if va != USTACK_PAGE => {
                    share_page(sys, child, va, pte.flags())?
                }
                _ => duppage(sys, child, va)?,
            }
        }

        let next = walk.next_candidate(va).unwrap_or(USER_TOP);
        // Never skip the exception stack, even when its page table is absent.
        va = if va < UXSTACK_BASE && next > UXSTACK_BASE {
            UXSTACK_BASE
        } else {
            next
        };
    }
    Ok(())
}

fn fork_with<S>(sys: &mut S, sharing: Sharing) -> Result<ForkResult, ForkError>
where
    S: Syscalls + ?Sized,
{
    set_pgfault_handler(sys).map_err(ForkError::SetHandler)?;

    let child = sys.exofork().map_err(ForkError::Exofork)?;
    if child.is_self() {
        return Ok(ForkResult::Child);
    }

    duplicate_address_space(sys, child, sharing)?;

    if let Some(entry) = sys.this_upcall() {
        sys.env_set_pgfault_upcall(child, entry)
            .map_err(ForkError::SetUpcall)?;
    }
    sys.env_set_status(child, EnvStatus::Runnable)
        .map_err(ForkError::SetStatus)?;
    Ok(ForkResult::Parent { child })
}

/// Duplicate the caller copy-on-write.
///
/// A failure part way through leaves the half-built child not runnable.
pub fn fork<S>(sys: &mut S) -> Result<ForkResult, ForkError>
where
    S: Syscalls + ?Sized,
{
    fork_with(sys, Sharing::CopyOnWrite)
}

/// Duplicate the caller sharing every page but the top stack page.
pub fn sfork<S>(sys: &mut S) -> Result<ForkResult, ForkError>
where
    S: Syscalls + ?Sized,
{
    fork_with(sys, Sharing::Shared)
}
