//! Hardware system calls for x86_64 forkos userland.
//!
//! # ABI Convention
//!
//! - `int 0x30`
//! - rax: syscall number
//! - rdx, rcx, rbx, rdi, rsi: arguments 1-5
//! - rax: return value, negative [`KernError`] codes on failure
//!
//! LLVM reserves rbx, so the third argument is swapped in and out around the
//! trap instead of being bound directly.
//!
//! The caller's own page tables are readable through a recursive PML4 slot
//! that the kernel maps user-readable and read-only.

use core::arch::{asm, global_asm};
use core::sync::atomic::{AtomicU64, Ordering};

use forkos_abi::error::demux;
use forkos_abi::syscall::{
    SYS_ENV_SET_PGFAULT_UPCALL, SYS_ENV_SET_STATUS, SYS_EXOFORK, SYS_GETENVID, SYS_PAGE_ALLOC,
    SYS_PAGE_MAP, SYS_PAGE_UNMAP,
};
use forkos_abi::trapframe::UTRAPFRAME_SIZE;
use forkos_abi::{EnvId, EnvStatus, PAGE_SIZE, UTrapframe, VirtAddr};
use forkos_mm::{PageFlags, PageTableEntry, PageTableLevel, PageWalk};

use super::{SysResult, Syscalls};

#[inline(always)]
pub unsafe fn syscall5(num: u64, a1: u64, a2: u64, a3: u64, a4: u64, a5: u64) -> i64 {
    let ret: u64;
    unsafe {
        asm!(
            "xchg {a3}, rbx",
            "int 0x30",
            "xchg {a3}, rbx",
            a3 = inout(reg) a3 => _,
            inlateout("rax") num => ret,
            in("rdx") a1,
            in("rcx") a2,
            in("rdi") a4,
            in("rsi") a5,
            options(nostack),
        );
    }
    ret as i64
}

#[inline(always)]
pub unsafe fn syscall0(num: u64) -> i64 {
    unsafe { syscall5(num, 0, 0, 0, 0, 0) }
}

#[inline(always)]
pub unsafe fn syscall2(num: u64, a1: u64, a2: u64) -> i64 {
    unsafe { syscall5(num, a1, a2, 0, 0, 0) }
}

#[inline(always)]
pub unsafe fn syscall3(num: u64, a1: u64, a2: u64, a3: u64) -> i64 {
    unsafe { syscall5(num, a1, a2, a3, 0, 0) }
}

// =============================================================================
// Recursive page-table window
// =============================================================================

/// PML4 slot that maps the PML4 itself.
pub const UVPT_SLOT: u64 = 0x1FE;

const fn sign_extend(addr: u64) -> u64 {
    if addr & (1 << 47) != 0 {
        addr | 0xFFFF_0000_0000_0000
    } else {
        addr
    }
}

/// Address of the entry that maps `va` at `level`, read through the window.
const fn window_entry(level: PageTableLevel, va: u64) -> u64 {
    let r = UVPT_SLOT;
    let (base, index) = match level {
        PageTableLevel::One => (r << 39, (va >> 12) & 0xF_FFFF_FFFF),
        PageTableLevel::Two => ((r << 39) | (r << 30), (va >> 21) & 0x7FF_FFFF),
        PageTableLevel::Three => ((r << 39) | (r << 30) | (r << 21), (va >> 30) & 0x3_FFFF),
        PageTableLevel::Four => ((r << 39) | (r << 30) | (r << 21) | (r << 12), (va >> 39) & 0x1FF),
    };
    sign_extend(base) + index * 8
}

fn read_entry(level: PageTableLevel, va: VirtAddr) -> PageTableEntry {
    let addr = window_entry(level, va.as_u64());
    // SAFETY: the window is mapped for the upper levels of every present
    // entry, and each level is only read after its parent was found present.
    PageTableEntry::from_raw(unsafe { core::ptr::read_volatile(addr as *const u64) })
}

// =============================================================================
// Upcall trampoline
// =============================================================================

// Entered by the kernel with rsp at a UTrapframe. Runs the handler, then
// resumes the interrupted context by pushing its rip onto the interrupted
// stack (the scratch word, for a nested fault) and returning through it.
// User code must be built without a red zone.
global_asm!(
    ".globl forkos_pgfault_upcall",
    "forkos_pgfault_upcall:",
    "    mov rdi, rsp",
    "    mov rbp, rsp",
    "    and rsp, -16",
    "    call forkos_pgfault_dispatch",
    "    mov rsp, rbp",
    "    mov rax, [rsp + 152]",
    "    sub rax, 8",
    "    mov [rsp + 152], rax",
    "    mov rbx, [rsp + 136]",
    "    mov [rax], rbx",
    "    add rsp, 16",
    "    pop r15",
    "    pop r14",
    "    pop r13",
    "    pop r12",
    "    pop r11",
    "    pop r10",
    "    pop r9",
    "    pop r8",
    "    pop rbp",
    "    pop rdi",
    "    pop rsi",
    "    pop rdx",
    "    pop rcx",
    "    pop rbx",
    "    pop rax",
    "    add rsp, 8",
    "    popfq",
    "    pop rsp",
    "    ret",
);

unsafe extern "C" {
    fn forkos_pgfault_upcall();
}

#[unsafe(no_mangle)]
extern "C" fn forkos_pgfault_dispatch(record: *const u8) {
    // SAFETY: the trampoline passes the record the kernel just wrote.
    let bytes = unsafe { core::slice::from_raw_parts(record, UTRAPFRAME_SIZE) };
    let Some(utf) = UTrapframe::from_bytes(bytes) else {
        panic!("pgfault: truncated fault record");
    };
    crate::pgfault::handle_upcall(&mut SyscallGate, &utf);
}

// =============================================================================
// Syscalls over int 0x30
// =============================================================================

/// Upcall this process registered for itself.
static OWN_UPCALL: AtomicU64 = AtomicU64::new(0);

pub struct SyscallGate;

impl Syscalls for SyscallGate {
    fn getenvid(&self) -> EnvId {
        EnvId(unsafe { syscall0(SYS_GETENVID) } as u32)
    }

    fn page_alloc(&mut self, env: EnvId, va: VirtAddr, perm: PageFlags) -> SysResult {
        demux(unsafe {
            syscall3(SYS_PAGE_ALLOC, env.0 as u64, va.as_u64(), perm.bits())
        })
        .map(drop)
    }

    fn page_map(
        &mut self,
        src_env: EnvId,
        src_va: VirtAddr,
        dst_env: EnvId,
        dst_va: VirtAddr,
        perm: PageFlags,
    ) -> SysResult {
        demux(unsafe {
            syscall5(
                SYS_PAGE_MAP,
                src_env.0 as u64,
                src_va.as_u64(),
                dst_env.0 as u64,
                dst_va.as_u64(),
                perm.bits(),
            )
        })
        .map(drop)
    }

    fn page_unmap(&mut self, env: EnvId, va: VirtAddr) -> SysResult {
        demux(unsafe { syscall2(SYS_PAGE_UNMAP, env.0 as u64, va.as_u64()) }).map(drop)
    }

    fn exofork(&mut self) -> SysResult<EnvId> {
        demux(unsafe { syscall0(SYS_EXOFORK) }).map(|id| EnvId(id as u32))
    }

    fn env_set_status(&mut self, env: EnvId, status: EnvStatus) -> SysResult {
        demux(unsafe { syscall2(SYS_ENV_SET_STATUS, env.0 as u64, status.as_u8() as u64) })
            .map(drop)
    }

    fn env_set_pgfault_upcall(&mut self, env: EnvId, entry: VirtAddr) -> SysResult {
        demux(unsafe {
            syscall2(SYS_ENV_SET_PGFAULT_UPCALL, env.0 as u64, entry.as_u64())
        })?;
        if env.is_self() || env == self.getenvid() {
            OWN_UPCALL.store(entry.as_u64(), Ordering::Relaxed);
        }
        Ok(())
    }

    fn walk(&self, va: VirtAddr) -> PageWalk {
        let mut level = PageTableLevel::Four;
        loop {
            let entry = read_entry(level, va);
            match level.next_lower() {
                None => return PageWalk::Leaf(entry),
                Some(_) if !entry.is_present() => return PageWalk::Missing { level },
                Some(lower) => level = lower,
            }
        }
    }

    fn copy_page(&mut self, src: VirtAddr, dst: VirtAddr) {
        // SAFETY: both pages are mapped in this address space and `dst` is
        // the writable scratch page, distinct from `src`.
        unsafe {
            core::ptr::copy_nonoverlapping(
                src.as_u64() as *const u8,
                dst.as_u64() as *mut u8,
                PAGE_SIZE as usize,
            );
        }
    }

    fn upcall_entry(&self) -> VirtAddr {
        VirtAddr(forkos_pgfault_upcall as *const () as u64)
    }

    fn this_upcall(&self) -> Option<VirtAddr> {
        match OWN_UPCALL.load(Ordering::Relaxed) {
            0 => None,
            addr => Some(VirtAddr(addr)),
        }
    }
}
