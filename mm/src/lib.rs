//! Page-table vocabulary shared by the kernel and user-level duplication code.

#![cfg_attr(not(test), no_std)]

pub mod cow;
pub mod error;
pub mod paging;
pub mod paging_defs;
pub mod permission;
pub mod user_ptr;

pub use cow::{Duplication, duplication_for, promoted_flags, sharing_for};
pub use error::{MmError, MmResult};
pub use paging::{PageTableEntry, PageTableLevel, PageTableLookup, PageWalk};
pub use paging_defs::{FaultErrorCode, PageFlags};
pub use permission::PagePermission;
pub use user_ptr::user_mem_check;
