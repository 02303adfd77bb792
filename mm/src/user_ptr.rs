//! Permission checks on user memory ranges.

use forkos_abi::addr::VirtAddr;
use forkos_abi::memlayout::USER_TOP;

use crate::error::{MmError, MmResult};
use crate::paging::PageTableLookup;
use crate::paging_defs::{PAGE_SIZE_4KB, PageFlags};

/// Verify that every page of `[va, va + len)` lies below [`USER_TOP`] and is
/// mapped with at least `required` permissions (`PRESENT` is always
/// required).
///
/// On failure the error carries the first offending address: `va` itself
/// for the first page, the page base for later ones.
pub fn user_mem_check<T>(space: &T, va: VirtAddr, len: u64, required: PageFlags) -> MmResult
where
    T: PageTableLookup + ?Sized,
{
    let required = required | PageFlags::PRESENT;
    let end = va
        .as_u64()
        .checked_add(len)
        .ok_or(MmError::OutOfUserRange { address: va.as_u64() })?;

    let mut page = va.page_base();
    while page.as_u64() < end {
        let address = page.as_u64().max(va.as_u64());
        if address >= USER_TOP.as_u64() {
            return Err(MmError::OutOfUserRange { address });
        }
        let permitted = space
            .walk(page)
            .present()
            .is_some_and(|pte| pte.flags().contains(required));
        if !permitted {
            return Err(MmError::PermissionDenied { address });
        }
        page = page.offset(PAGE_SIZE_4KB);
    }
    Ok(())
}
