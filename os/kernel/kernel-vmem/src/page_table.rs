//! # Memory Page Table
//!
//! The two paging levels of 32-bit x86: a [`PageDirectory`](pd::PageDirectory)
//! whose entries point at [`PageTable`](pt::PageTable)s, whose entries map 4 KiB
//! pages.
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PDX  |  PTX  | Offset |
//! ```

pub mod pd;
pub mod pt;

use crate::page_table::pd::PdIndex;
use crate::page_table::pt::PtIndex;
use kernel_memory_addresses::VirtualAddress;

/// Entries per directory and per table.
pub const ENTRIES: usize = 1024;

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (PdIndex, PtIndex) {
    (PdIndex::from(va), PtIndex::from(va))
}

/// Reassemble the virtual address selected by a directory and table index
/// (offset zero).
#[inline]
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub const fn join_indices(pdx: PdIndex, ptx: PtIndex) -> VirtualAddress {
    VirtualAddress::new(((pdx.as_usize() as u32) << 22) | ((ptx.as_usize() as u32) << 12))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_ok() {
        let va = VirtualAddress::new(0xEF40_3456);
        let (pdx, ptx) = split_indices(va);
        assert_eq!(pdx.as_usize(), 0x3BD);
        assert_eq!(ptx.as_usize(), 0x003);
        assert_eq!(join_indices(pdx, ptx).as_u32(), 0xEF40_3000);
    }

    #[test]
    fn top_of_address_space() {
        let (pdx, ptx) = split_indices(VirtualAddress::new(u32::MAX));
        assert_eq!(pdx.as_usize(), ENTRIES - 1);
        assert_eq!(ptx.as_usize(), ENTRIES - 1);
    }
}
