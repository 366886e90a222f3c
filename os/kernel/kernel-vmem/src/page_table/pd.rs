//! # x86 Page Directory (PD)
//!
//! - [`PdIndex`]: index type for virtual-address bits `[31:22]`.
//! - [`PdEntry`]: a PD entry pointing to a [`PageTable`](super::pt::PageTable).
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 PD entries.
//!
//! ## Semantics
//!
//! Every present entry links a page table covering 4 MiB of virtual space.
//! 4 MiB leaves (`PS=1`) are never created.
//!
//! One slot of the kernel directory is special: it links the directory to
//! itself (see [`RecursiveWindow`](crate::RecursiveWindow)). Walking through
//! that slot treats the directory as a page table, which is what makes the
//! page tables readable as ordinary memory.

use crate::PageEntryBits;
use crate::page_table::ENTRIES;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PdIndex(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PdEntry(PageEntryBits);

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES],
}

impl PdIndex {
    /// Build an index from a virtual address (extracts bits `[31:22]`).
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self((va.as_u32() >> 22) as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// The first virtual address covered by this slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }

    /// Iterate all 1024 directory indices in ascending order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn all() -> impl Iterator<Item = Self> {
        (0..ENTRIES as u16).map(Self)
    }
}

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, the frame of the page table this entry links.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage<Size4K>> {
        if !self.is_present() {
            return None;
        }
        Some(PhysicalPage::from_addr(self.0.physical_address()))
    }

    /// Create a link to the page table in `table`.
    ///
    /// Sets `present=1` and forces `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_next(table: PhysicalPage<Size4K>, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_physical_address(table.base());
        Self(flags)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0.into_bits()
    }

    /// Construct from a raw 32-bit value. No validation is performed.
    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from_bits(v))
    }
}

impl PageDirectory {
    /// Create a fully zeroed directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES],
        }
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: PdIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: PdIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalAddress;

    #[test]
    fn link_forces_present_and_small_pages() {
        let table = PhysicalPage::<Size4K>::from_addr(PhysicalAddress::new(0x0040_2000));
        let e = PdEntry::make_next(table, PageEntryBits::user_rw().with_large_page(true));
        assert_eq!(e.raw(), 0x0040_2007);
        assert_eq!(e.next_table(), Some(table));
        assert!(PdEntry::zero().next_table().is_none());
    }

    #[test]
    fn index_base() {
        assert_eq!(PdIndex::from(VirtualAddress::new(0xF012_3456)).base().as_u32(), 0xF000_0000);
        assert_eq!(PdIndex::all().count(), ENTRIES);
    }
}
