//! Error type for the memory management layer.

use crate::paging::PageTableLevel;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// Flags do not describe a present page.
    NotPresent,
    /// A page is marked copy-on-write and writable at the same time.
    WritableCow { bits: u64 },
    NotMapped { address: u64, level: PageTableLevel },
    /// Range leaves the user part of the address space.
    OutOfUserRange { address: u64 },
    /// Page is mapped but lacks the required permissions.
    PermissionDenied { address: u64 },
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPresent => write!(f, "page not present"),
            Self::WritableCow { bits } => {
                write!(f, "flags {:#x} are both writable and copy-on-write", bits)
            }
            Self::NotMapped { address, level } => {
                write!(f, "address {:#x} not mapped (stopped at level {})", address, level)
            }
            Self::OutOfUserRange { address } => {
                write!(f, "address {:#x} outside user space", address)
            }
            Self::PermissionDenied { address } => {
                write!(f, "access to {:#x} denied by page permissions", address)
            }
        }
    }
}

/// Convenience result type for memory management operations.
pub type MmResult<T = ()> = Result<T, MmError>;
