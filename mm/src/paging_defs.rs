//! Page table flags and paging constants.
//!
//! This module provides type-safe bitflags for x86_64 page table entries
//! and for the page-fault error code pushed by the CPU.

use bitflags::bitflags;

bitflags! {
    /// x86_64 page table entry flags.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use forkos_mm::paging_defs::PageFlags;
    ///
    /// let flags = PageFlags::USER_RO | PageFlags::COW;
    /// assert!(!flags.contains(PageFlags::WRITABLE));
    /// ```
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PageFlags: u64 {
        /// Page is present in memory (bit 0).
        const PRESENT       = 1 << 0;
        /// Page is writable (otherwise read-only) (bit 1).
        const WRITABLE      = 1 << 1;
        /// Page is accessible from user mode (ring 3) (bit 2).
        const USER          = 1 << 2;
        /// Write-through caching (vs write-back) (bit 3).
        const WRITE_THROUGH = 1 << 3;
        /// Disable caching for this page (bit 4).
        const CACHE_DISABLE = 1 << 4;
        /// Set by hardware when page is accessed (bit 5).
        const ACCESSED      = 1 << 5;
        /// Set by hardware when page is written (bit 6).
        const DIRTY         = 1 << 6;
        /// Page is 2MB (PDE) or 1GB (PDPTE) huge page (bit 7).
        const HUGE          = 1 << 7;
        /// Page is global (not flushed on CR3 change) (bit 8).
        const GLOBAL        = 1 << 8;
        /// Disable instruction fetch from this page (bit 63).
        const NO_EXECUTE    = 1 << 63;

        // =====================================================================
        // Software-defined flags (bits 9-11 are available for OS use)
        // =====================================================================

        /// Bit 9, free for applications.
        const AVAIL0        = 1 << 9;
        /// Bit 10, free for applications.
        const AVAIL1        = 1 << 10;
        /// Copy-on-Write marker (bit 11). Never set together with WRITABLE.
        const COW           = 1 << 11;

        /// All software-available bits.
        const AVAIL = Self::AVAIL0.bits() | Self::AVAIL1.bits() | Self::COW.bits();

        // =====================================================================
        // Convenience Combinations
        // =====================================================================

        /// Bits a user process may pass to the mapping syscalls.
        const SYSCALL_MASK = Self::PRESENT.bits() | Self::WRITABLE.bits()
            | Self::USER.bits() | Self::AVAIL.bits();
        /// User read-write page (PRESENT | WRITABLE | USER).
        const USER_RW = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
        /// User read-only page (PRESENT | USER).
        const USER_RO = Self::PRESENT.bits() | Self::USER.bits();
    }
}

impl PageFlags {
    /// Address mask for extracting physical frame address from PTE.
    /// Bits 12-51 contain the 4KB-aligned physical address.
    pub const ADDRESS_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    /// Extract physical address from a page table entry.
    #[inline]
    pub const fn extract_address(pte: u64) -> u64 {
        pte & Self::ADDRESS_MASK
    }

    /// Extract the permission and attribute bits from a raw entry.
    #[inline]
    pub const fn from_pte(pte: u64) -> Self {
        Self::from_bits_truncate(pte & !Self::ADDRESS_MASK)
    }

    /// The subset of bits that survives a round trip through the mapping
    /// syscalls.
    #[inline]
    pub const fn syscall_bits(self) -> Self {
        self.intersection(Self::SYSCALL_MASK)
    }
}

bitflags! {
    /// Page-fault error code pushed by the CPU.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FaultErrorCode: u64 {
        /// The page was present; the fault is a protection violation.
        const PROTECTION        = 1 << 0;
        const WRITE             = 1 << 1;
        const USER              = 1 << 2;
        const RESERVED_WRITE    = 1 << 3;
        const INSTRUCTION_FETCH = 1 << 4;
    }
}

impl FaultErrorCode {
    #[inline]
    pub const fn from_raw(err: u64) -> Self {
        Self::from_bits_truncate(err)
    }
}

// =============================================================================
// Page Sizes
// =============================================================================

/// 4KB page size (standard).
pub const PAGE_SIZE_4KB: u64 = 0x1000;

/// 4KB page size as usize for buffers and slices.
pub const PAGE_SIZE_4KB_USIZE: usize = PAGE_SIZE_4KB as usize;

/// 2MB span of one page table.
pub const PAGE_SIZE_2MB: u64 = 0x20_0000;

/// 1GB span of one page directory.
pub const PAGE_SIZE_1GB: u64 = 0x4000_0000;
