//! Tagged view of user page permissions.
//!
//! Page table entries overload a software-available bit as the copy-on-write
//! marker. Code that decides how a page is duplicated or promoted goes
//! through [`PagePermission`] instead of testing raw bits, and converts back
//! to bits only at the boundary with the page-table service.

use crate::error::{MmError, MmResult};
use crate::paging_defs::PageFlags;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagePermission {
    /// Writable and owned by exactly one address space.
    PrivateWritable,
    PrivateReadOnly,
    /// Writable and mapped on the same frame in more than one address space.
    /// Only a thread-like share produces it; the page-table bits are those of
    /// [`PrivateWritable`](Self::PrivateWritable).
    SharedWritable,
    /// Read-only and shared until the next write, which makes a private copy.
    SharedCopyOnWrite,
}

impl PagePermission {
    /// Classify the flags of a present user page.
    pub fn from_flags(flags: PageFlags) -> MmResult<Self> {
        if !flags.contains(PageFlags::PRESENT) {
            return Err(MmError::NotPresent);
        }
        let writable = flags.contains(PageFlags::WRITABLE);
        if flags.contains(PageFlags::COW) {
            if writable {
                return Err(MmError::WritableCow { bits: flags.bits() });
            }
            return Ok(Self::SharedCopyOnWrite);
        }
        Ok(if writable {
            Self::PrivateWritable
        } else {
            Self::PrivateReadOnly
        })
    }

    /// The permission the same frame has once it is shared as-is with another
    /// address space.
    pub const fn shared(self) -> Self {
        match self {
            Self::PrivateWritable => Self::SharedWritable,
            other => other,
        }
    }

    /// Canonical user flags for this permission.
    pub const fn to_flags(self) -> PageFlags {
        match self {
            Self::PrivateWritable | Self::SharedWritable => PageFlags::USER_RW,
            Self::PrivateReadOnly => PageFlags::USER_RO,
            Self::SharedCopyOnWrite => PageFlags::USER_RO.union(PageFlags::COW),
        }
    }

    #[inline]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::PrivateWritable | Self::SharedWritable)
    }

    #[inline]
    pub const fn is_copy_on_write(self) -> bool {
        matches!(self, Self::SharedCopyOnWrite)
    }
}
