//! System call numbers.
//!
//! The call number travels in `rax`; up to five arguments follow in `rdx`,
//! `rcx`, `rbx`, `rdi`, `rsi`. The result replaces `rax`.

pub const SYS_CPUTS: u64 = 0;
pub const SYS_CGETC: u64 = 1;
pub const SYS_GETENVID: u64 = 2;
pub const SYS_ENV_DESTROY: u64 = 3;
pub const SYS_PAGE_ALLOC: u64 = 4;
pub const SYS_PAGE_MAP: u64 = 5;
pub const SYS_PAGE_UNMAP: u64 = 6;
pub const SYS_EXOFORK: u64 = 7;
pub const SYS_ENV_SET_STATUS: u64 = 8;
pub const SYS_ENV_SET_PGFAULT_UPCALL: u64 = 9;
pub const SYS_YIELD: u64 = 10;

/// Number of argument registers after the call number.
pub const SYSCALL_ARGS: usize = 5;
