//! Copy-on-write permission transforms.
//!
//! | source page                     | child                  | parent             |
//! |---------------------------------|------------------------|--------------------|
//! | read-only                       | same flags, same frame | unchanged          |
//! | writable or already COW         | read-only + COW        | read-only + COW    |
//!
//! A write fault on a COW page is resolved by copying the frame and mapping
//! the copy with [`promoted_flags`]. [`sharing_for`] is the thread-like
//! variant: the child gets the same frame with the same flags.

use crate::error::MmResult;
use crate::paging_defs::PageFlags;
use crate::permission::PagePermission;

/// How one present page is carried into a child address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Duplication {
    /// Map the frame into the child with these flags; the parent is untouched.
    Share(PageFlags),
    /// Map the frame into the child with these flags, then remap the parent
    /// with the same flags.
    CopyOnWrite(PageFlags),
}

impl Duplication {
    #[inline]
    pub const fn flags(self) -> PageFlags {
        match self {
            Self::Share(flags) | Self::CopyOnWrite(flags) => flags,
        }
    }
}

/// Decide how a page with `flags` is duplicated.
pub fn duplication_for(flags: PageFlags) -> MmResult<Duplication> {
    let flags = flags.syscall_bits();
    Ok(match PagePermission::from_flags(flags)? {
        PagePermission::PrivateReadOnly => Duplication::Share(flags),
        PagePermission::PrivateWritable
        | PagePermission::SharedWritable
        | PagePermission::SharedCopyOnWrite => Duplication::CopyOnWrite(cow_flags(flags)),
    })
}

/// Decide how a page with `flags` is carried into a child that shares the
/// caller's memory. Returns the permission the frame ends up with.
pub fn sharing_for(flags: PageFlags) -> MmResult<(PagePermission, Duplication)> {
    let flags = flags.syscall_bits();
    let perm = PagePermission::from_flags(flags)?.shared();
    Ok((perm, Duplication::Share(flags)))
}

/// Flags of a page after it has been marked copy-on-write.
#[inline]
pub const fn cow_flags(flags: PageFlags) -> PageFlags {
    flags
        .syscall_bits()
        .difference(PageFlags::WRITABLE)
        .union(PageFlags::COW)
}

/// Flags of the private copy that replaces a copy-on-write mapping.
#[inline]
pub const fn promoted_flags(flags: PageFlags) -> PageFlags {
    flags
        .syscall_bits()
        .difference(PageFlags::COW)
        .union(PageFlags::WRITABLE)
}
