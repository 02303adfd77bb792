//! User virtual address-space layout.
//!
//! ```text
//!  USER_TOP, UXSTACK_TOP ->  +------------------------------+
//!                            |    user exception stack      |  one page
//!                            +------------------------------+  UXSTACK_TOP - PAGE_SIZE
//!                            |    unmapped guard page       |
//!  USTACK_TOP            ->  +------------------------------+
//!                            |    normal user stack         |  grows down
//!                            ~              ...             ~
//!  PROCESS_CODE_START_VA ->  +------------------------------+
//!                            |    fault handler scratch     |  PFTEMP
//!                            +------------------------------+
//! ```

use crate::PAGE_SIZE;
use crate::addr::VirtAddr;

/// Top of the duplicated user address space. Nothing at or above this
/// address is copied into a child.
pub const USER_TOP: VirtAddr = VirtAddr(0x0000_7FFF_FF00_0000);

/// Top of the user exception stack; the stack is the single page below it.
pub const UXSTACK_TOP: VirtAddr = USER_TOP;

/// Base (lowest address) of the one-page user exception stack.
pub const UXSTACK_BASE: VirtAddr = VirtAddr(UXSTACK_TOP.0 - PAGE_SIZE);

/// Top of the normal user stack, one guard page below the exception stack.
pub const USTACK_TOP: VirtAddr = VirtAddr(USER_TOP.0 - 2 * PAGE_SIZE);

/// Base of the topmost normal stack page.
pub const USTACK_PAGE: VirtAddr = VirtAddr(USTACK_TOP.0 - PAGE_SIZE);

/// Top of CPU 0's kernel stack. Each further CPU's stack sits
/// `KSTKSIZE + KSTKGAP` below the previous one.
pub const KSTACKTOP: VirtAddr = VirtAddr(0xFFFF_FFFF_8000_0000);
/// Size of one per-CPU kernel stack.
pub const KSTKSIZE: u64 = 8 * PAGE_SIZE;
/// Unmapped guard between two kernel stacks.
pub const KSTKGAP: u64 = 8 * PAGE_SIZE;

/// Scratch page used by the copy-on-write fault handler.
pub const PFTEMP: VirtAddr = VirtAddr(0x0000_0000_003F_F000);

/// Start of program text.
pub const PROCESS_CODE_START_VA: VirtAddr = VirtAddr(0x0000_0000_0040_0000);

/// Returns true if `va` lies within the exception-stack page.
#[inline]
pub const fn in_exception_stack(va: u64) -> bool {
    va >= UXSTACK_BASE.0 && va < UXSTACK_TOP.0
}

/// Returns true if `va` lies in the guard page below the exception stack.
/// `USTACK_TOP` itself is the empty normal stack and is excluded.
#[inline]
pub const fn in_exception_guard(va: u64) -> bool {
    va > USTACK_TOP.0 && va < UXSTACK_BASE.0
}
