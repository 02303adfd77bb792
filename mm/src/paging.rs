//! Page-table levels, entries, and the result of a four-level walk.

use core::fmt;

use forkos_abi::addr::{PhysAddr, VirtAddr};

use crate::paging_defs::{PAGE_SIZE_4KB, PageFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum PageTableLevel {
    Four = 4,
    Three = 3,
    Two = 2,
    One = 1,
}

impl PageTableLevel {
    #[inline]
    pub const fn next_lower(self) -> Option<Self> {
        match self {
            Self::Four => Some(Self::Three),
            Self::Three => Some(Self::Two),
            Self::Two => Some(Self::One),
            Self::One => None,
        }
    }

    #[inline]
    pub const fn index_of(self, vaddr: VirtAddr) -> usize {
        let shift = 12 + ((self as u8 - 1) * 9);
        ((vaddr.as_u64() >> shift) & 0x1FF) as usize
    }

    /// Bytes of address space covered by one entry at this level.
    #[inline]
    pub const fn entry_size(self) -> u64 {
        1u64 << (12 + ((self as u8 - 1) * 9))
    }

    #[inline]
    pub const fn align_down(self, vaddr: VirtAddr) -> VirtAddr {
        VirtAddr(vaddr.as_u64() & !(self.entry_size() - 1))
    }
}

impl fmt::Display for PageTableLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Four => write!(f, "PML4"),
            Self::Three => write!(f, "PDPT"),
            Self::Two => write!(f, "PD"),
            Self::One => write!(f, "PT"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn new(addr: PhysAddr, flags: PageFlags) -> Self {
        Self((addr.as_u64() & PageFlags::ADDRESS_MASK) | flags.bits())
    }

    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PageFlags::PRESENT.bits() != 0
    }

    #[inline]
    pub const fn address(self) -> PhysAddr {
        PhysAddr(PageFlags::extract_address(self.0))
    }

    #[inline]
    pub const fn flags(self) -> PageFlags {
        PageFlags::from_pte(self.0)
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTableEntry")
            .field("address", &format_args!("{:#x}", self.address().as_u64()))
            .field("flags", &self.flags())
            .finish()
    }
}

/// Outcome of looking up one virtual page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageWalk {
    /// The leaf entry for the page. It may itself be non-present.
    Leaf(PageTableEntry),
    /// The entry at `level` is not present, so the whole
    /// `level.entry_size()` span around the address is unmapped.
    Missing { level: PageTableLevel },
}

impl PageWalk {
    /// The leaf entry if the page is present.
    #[inline]
    pub fn present(self) -> Option<PageTableEntry> {
        match self {
            Self::Leaf(pte) if pte.is_present() => Some(pte),
            _ => None,
        }
    }

    /// First address after `va` that may be mapped, skipping a missing
    /// table's entire span. `None` once the end of the address space is
    /// reached.
    pub fn next_candidate(self, va: VirtAddr) -> Option<VirtAddr> {
        match self {
            Self::Leaf(_) => va.page_base().checked_offset(PAGE_SIZE_4KB),
            Self::Missing { level } => level.align_down(va).checked_offset(level.entry_size()),
        }
    }
}

/// Read-only view of one address space's page tables.
pub trait PageTableLookup {
    fn walk(&self, va: VirtAddr) -> PageWalk;
}

impl<F> PageTableLookup for F
where
    F: Fn(VirtAddr) -> PageWalk,
{
    fn walk(&self, va: VirtAddr) -> PageWalk {
        self(va)
    }
}
