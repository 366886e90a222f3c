//! # Address Space (32-bit x86, directory-rooted)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space (a page directory and the page tables it links).
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`] finds, and optionally creates, the page table slot
//!   that maps a virtual address. Every mapping operation goes through it.
//! - [`AddressSpace::map_region`] installs a contiguous range of mappings.
//! - [`AddressSpace::query`] translates a VA to a PA.
//! - [`AddressSpace::install_recursive`] links the directory into itself.
//!
//! ## Design
//!
//! - Slots are handed out as [`EntrySlot`] values (table frame + index) rather
//!   than references, so a caller can hold a slot across other walks without
//!   aliasing the table memory. [`load`](AddressSpace::load) and
//!   [`store`](AddressSpace::store) touch the entry only for the duration of the
//!   access.
//! - Intermediate links are created `PRESENT | WRITABLE | USER`; the table
//!   entries below decide the effective permissions.
//! - Keeps `unsafe` confined to viewing a physical frame as a typed table
//!   through the `PhysMapper`.
//!
//! ## Safety
//!
//! - Mutating active mappings requires **TLB maintenance** (`invlpg` per page
//!   or a CR3 reload). This type never does it; see [`Mmu`](crate::Mmu).
//! - The provided `PhysMapper` must yield **writable** views of table frames.

mod map_region;

pub use crate::address_space::map_region::MapRegionError;
use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
use crate::page_table::split_indices;
use crate::{FrameAlloc, PageEntryBits, PhysMapper, RecursiveWindow};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use log::trace;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>, // page directory frame
    mapper: &'m M,
}

/// The page directory root page for an [`AddressSpace`].
pub type RootPage = PhysicalPage<Size4K>;

/// Location of one page table entry: the table's frame and the index in it.
///
/// Obtained from [`AddressSpace::walk`]; read and written through
/// [`AddressSpace::load`] and [`AddressSpace::store`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct EntrySlot {
    table: PhysicalPage<Size4K>,
    index: PtIndex,
}

impl EntrySlot {
    #[inline]
    #[must_use]
    pub const fn new(table: PhysicalPage<Size4K>, index: PtIndex) -> Self {
        Self { table, index }
    }

    /// Frame of the page table holding the entry.
    #[inline]
    #[must_use]
    pub const fn table(self) -> PhysicalPage<Size4K> {
        self.table
    }

    #[inline]
    #[must_use]
    pub const fn index(self) -> PtIndex {
        self.index
    }

    /// Physical address of the 32-bit entry itself.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.table.base().as_u32() + (self.index.as_usize() as u32) * 4)
    }
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Wrap the directory in `root`. The directory contents are used as found.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Physical page of the page directory.
    #[inline]
    pub const fn root_page(&self) -> RootPage {
        self.root
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Read the directory entry at `pdx`.
    #[inline]
    #[must_use]
    pub fn pd_entry(&self, pdx: PdIndex) -> PdEntry {
        let pd = unsafe { self.mapper.phys_to_mut::<PageDirectory>(self.root.base()) };
        pd.get(pdx)
    }

    /// Overwrite the directory entry at `pdx`.
    ///
    /// Unlinking a table this way neither frees it nor flushes the TLB.
    #[inline]
    pub fn set_pd_entry(&self, pdx: PdIndex, entry: PdEntry) {
        let pd = unsafe { self.mapper.phys_to_mut::<PageDirectory>(self.root.base()) };
        pd.set(pdx, entry);
    }

    /// Read the page table entry at `slot`.
    #[inline]
    #[must_use]
    pub fn load(&self, slot: EntrySlot) -> PtEntry {
        let pt = unsafe { self.mapper.phys_to_mut::<PageTable>(slot.table.base()) };
        pt.get(slot.index)
    }

    /// Write the page table entry at `slot`.
    ///
    /// Caller must handle TLB invalidation when changing active mappings.
    #[inline]
    pub fn store(&self, slot: EntrySlot, entry: PtEntry) {
        let pt = unsafe { self.mapper.phys_to_mut::<PageTable>(slot.table.base()) };
        pt.set(slot.index, entry);
    }

    /// Find the page table slot that maps `va`.
    ///
    /// If the directory has no table for `va`: with `create` unset, returns
    /// `None`; otherwise takes a frame from `alloc`, zeroes it, links it
    /// `PRESENT | WRITABLE | USER` and continues. `None` with `create` set
    /// means `alloc` was exhausted; the directory is then unchanged.
    pub fn walk<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        create: bool,
    ) -> Option<EntrySlot> {
        let (pdx, ptx) = split_indices(va);
        let table = match self.pd_entry(pdx).next_table() {
            Some(table) => table,
            None if !create => return None,
            None => {
                let table = alloc.alloc_4k()?;
                unsafe { self.mapper.zero_frame(table) };
                self.set_pd_entry(pdx, PdEntry::make_next(table, PageEntryBits::user_rw()));
                trace!("Linked page table {table} for {}", pdx.base());
                table
            }
        };
        Some(EntrySlot::new(table, ptx))
    }

    /// Non-creating [`walk`](Self::walk).
    #[inline]
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<EntrySlot> {
        let (pdx, ptx) = split_indices(va);
        let table = self.pd_entry(pdx).next_table()?;
        Some(EntrySlot::new(table, ptx))
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let slot = self.entry(va)?;
        let (page, _) = self.load(slot).page_4k()?;
        Some(page.join(va.offset::<Size4K>()))
    }

    /// Link the directory into its own slot `window.slot()`, which makes every
    /// page table of this space readable at `window.base()`.
    ///
    /// The link is `PRESENT | USER` (read-only); the slot must not be used for
    /// anything else afterwards.
    pub fn install_recursive(&self, window: RecursiveWindow) {
        self.set_pd_entry(window.slot(), window.entry_for(self.root));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{TestPhys, space};

    #[test]
    fn slot_address_is_table_base_plus_index() {
        let slot = EntrySlot::new(PhysicalPage::from_number(0x42), PtIndex::new(0x3FF));
        assert_eq!(slot.address().as_u32(), 0x0004_2FFC);
    }

    #[test]
    fn recursive_window_exposes_tables() {
        let phys = TestPhys::with_frames(8);
        let (aspace, mut alloc) = space(&phys, 8);
        let window = RecursiveWindow::at(VirtualAddress::new(0xEF40_0000));
        aspace.install_recursive(window);

        let va = VirtualAddress::new(0x0080_5000);
        let slot = aspace.walk(&mut alloc, va, true).unwrap();
        aspace.store(
            slot,
            PtEntry::make_4k(PhysicalPage::from_number(7), PageEntryBits::user_rw()),
        );

        // The directory appears as a page inside the window...
        assert_eq!(aspace.query(window.directory_address()), Some(aspace.root_page().base()));
        // ...and so does every entry of every table.
        assert_eq!(aspace.query(window.pte_address(va)), Some(slot.address()));
        let pde = aspace.query(window.pde_address(va)).unwrap();
        assert_eq!(pde.as_u32(), aspace.root_page().base().as_u32() + 4 * 2);

        let recursive = aspace.pd_entry(window.slot());
        assert!(recursive.flags().user_access());
        assert!(!recursive.flags().writable());
    }
}
