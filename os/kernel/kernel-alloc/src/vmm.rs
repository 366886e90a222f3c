//! Reference-counted page mapping for a single address space.
//!
//! The [`Vmm`] ties an [`AddressSpace`] to the [`FrameTable`] that supplies
//! its page tables and to the [`Mmu`] whose TLB must follow its changes.
//! Every 4 KiB mapping installed through [`Vmm::insert`] holds one reference
//! on the mapped frame; [`Vmm::remove`] drops it and frees the frame with the
//! last one.
//!
//! # Example
//! ```ignore
//! let mut vmm = Vmm::new(aspace, frames, mmu);
//! let frame = vmm.allocate(true).ok_or(VmmError::OutOfMemory { va })?;
//! vmm.insert(frame, va, PageEntryBits::user_rw())?;
//! assert_eq!(vmm.lookup(va).map(|m| m.frame), Some(frame));
//! vmm.remove(va);
//! ```

use crate::frame_table::{FrameNumber, FrameTable};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress};
use kernel_vmem::{AddressSpace, EntrySlot, Mmu, PageEntryBits, PhysMapper, PtEntry};

/// Minimal kernel virtual memory manager.
pub struct Vmm<'m, M: PhysMapper, U: Mmu> {
    aspace: AddressSpace<'m, M>,
    frames: FrameTable<'m>,
    mmu: U,
}

/// A present 4 KiB mapping as found by [`Vmm::lookup`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Mapping {
    /// The mapped frame.
    pub frame: FrameNumber,
    /// The page table entry, including its permission bits.
    pub entry: PtEntry,
    /// Where the entry lives.
    pub slot: EntrySlot,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmmError {
    /// No frame was available for the page table covering `va`.
    #[error("out of memory mapping {va}")]
    OutOfMemory { va: VirtualAddress },
}

impl<'m, M: PhysMapper, U: Mmu> Vmm<'m, M, U> {
    pub const fn new(aspace: AddressSpace<'m, M>, frames: FrameTable<'m>, mmu: U) -> Self {
        Self {
            aspace,
            frames,
            mmu,
        }
    }

    #[inline]
    pub const fn address_space(&self) -> &AddressSpace<'m, M> {
        &self.aspace
    }

    #[inline]
    pub const fn frames(&self) -> &FrameTable<'m> {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FrameTable<'m> {
        &mut self.frames
    }

    #[inline]
    pub const fn mmu(&self) -> &U {
        &self.mmu
    }

    #[inline]
    pub const fn mmu_mut(&mut self) -> &mut U {
        &mut self.mmu
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.aspace.mapper()
    }

    /// Take a frame off the free list, zero-filled if `zero` is set.
    pub fn allocate(&mut self, zero: bool) -> Option<FrameNumber> {
        self.frames.allocate(self.aspace.mapper(), zero)
    }

    /// [`AddressSpace::walk`] with page tables taken from the frame table.
    pub fn walk(&mut self, va: VirtualAddress, create: bool) -> Option<EntrySlot> {
        self.aspace.walk(&mut self.frames, va, create)
    }

    /// Map `frame` at `va` with `perm | PRESENT`.
    ///
    /// A mapping already present at `va` is removed first. Re-inserting the
    /// frame that is already mapped there only updates the permissions. An
    /// entry naming memory outside the frame table holds no reference and is
    /// simply overwritten.
    ///
    /// # Errors
    /// [`VmmError::OutOfMemory`] if a page table was needed and none could be
    /// allocated. Nothing is changed in that case.
    pub fn insert(
        &mut self,
        frame: FrameNumber,
        va: VirtualAddress,
        perm: PageEntryBits,
    ) -> Result<(), VmmError> {
        let slot = self.walk(va, true).ok_or(VmmError::OutOfMemory { va })?;

        // Counted before the removal so a same-frame re-insert cannot free it.
        self.frames.increment(frame);
        if self.aspace.load(slot).is_present() {
            self.remove(va);
        }
        self.aspace
            .store(slot, PtEntry::make_4k(frame.page(), perm.permissions()));
        Ok(())
    }

    /// The mapping at `va`, if one is present and names a managed frame.
    ///
    /// The direct map at `KERNBASE` reaches past installed memory; such
    /// entries translate (see [`translate`](Self::translate)) but have no
    /// frame to report, so they yield `None` here.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<Mapping> {
        let slot = self.aspace.entry(va)?;
        let entry = self.aspace.load(slot);
        let (page, _) = entry.page_4k()?;
        let frame = self.frames.frame_at(page.base()).ok()?;
        Some(Mapping { frame, entry, slot })
    }

    /// Unmap `va`, dropping the frame's reference.
    ///
    /// Does nothing if [`lookup`](Self::lookup) finds no managed mapping.
    pub fn remove(&mut self, va: VirtualAddress) {
        let Some(mapping) = self.lookup(va) else {
            return;
        };
        self.frames.decrement_and_maybe_free(mapping.frame);
        self.aspace.store(mapping.slot, PtEntry::zero());
        self.invalidate(va);
    }

    /// Drop the cached translation of the page containing `va`.
    #[inline]
    pub fn invalidate(&mut self, va: VirtualAddress) {
        self.mmu.invalidate_page(va.page::<Size4K>());
    }

    /// Translate `va` as the MMU would.
    #[inline]
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.aspace.query(va)
    }

    /// Map `[va, va + size)` to `[pa, pa + size)` with `perm | PRESENT`.
    ///
    /// For the kernel's static mappings during bring-up: no reference counts
    /// are touched and any existing entries are overwritten.
    ///
    /// # Panics
    /// If the region is malformed or page tables run out.
    pub fn boot_map_region(
        &mut self,
        va: VirtualAddress,
        size: u32,
        pa: PhysicalAddress,
        perm: PageEntryBits,
    ) {
        if let Err(e) = self.aspace.map_region(&mut self.frames, va, size, pa, perm) {
            panic!("boot_map_region: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phys_mapper::HostedPhysMemory;
    use kernel_memory_addresses::{PhysicalPage, VirtualPage};

    const FRAMES: u32 = 64;

    #[derive(Default)]
    struct RecordingMmu {
        invalidated: Vec<VirtualPage<Size4K>>,
    }

    impl Mmu for RecordingMmu {
        unsafe fn activate(&mut self, _root: PhysicalPage<Size4K>) {}
        unsafe fn enable_paging(&mut self) {}
        fn invalidate_page(&mut self, page: VirtualPage<Size4K>) {
            self.invalidated.push(page);
        }
    }

    /// 64 managed frames, with the descriptors and the directory in two extra
    /// frames past the managed range.
    fn vmm(mem: &HostedPhysMemory) -> Vmm<'_, HostedPhysMemory, RecordingMmu> {
        let descriptors = PhysicalPage::<Size4K>::from_number(FRAMES).base();
        let mut frames = unsafe { FrameTable::from_physical(mem, descriptors, FRAMES) };
        frames.initialize_free_list(PhysicalAddress::zero());
        let aspace = AddressSpace::from_root(mem, PhysicalPage::from_number(FRAMES + 1));
        Vmm::new(aspace, frames, RecordingMmu::default())
    }

    fn memory() -> HostedPhysMemory {
        HostedPhysMemory::new(FRAMES + 2)
    }

    #[test]
    fn insert_counts_the_mapping_and_the_table() {
        let mem = memory();
        let mut vmm = vmm(&mem);
        let frame = vmm.allocate(false).unwrap();
        let va = VirtualAddress::new(0x0040_3000);

        vmm.insert(frame, va, PageEntryBits::user_rw()).unwrap();
        let mapping = vmm.lookup(va).unwrap();
        assert_eq!(mapping.frame, frame);
        assert_eq!(mapping.entry.flags().permissions().into_bits(), 0x007);
        assert_eq!(vmm.frames().ref_count(frame), 1);

        let table = FrameNumber::from(mapping.slot.table());
        assert_eq!(vmm.frames().ref_count(table), 1);
        assert_eq!(vmm.translate(va + 0x10), Some(frame.base() + 0x10));
    }

    #[test]
    fn reinserting_the_same_frame_is_neutral() {
        let mem = memory();
        let mut vmm = vmm(&mem);
        let frame = vmm.allocate(false).unwrap();
        let va = VirtualAddress::new(0x1000);

        vmm.insert(frame, va, PageEntryBits::kernel_rw()).unwrap();
        vmm.insert(frame, va, PageEntryBits::user_ro()).unwrap();
        assert_eq!(vmm.frames().ref_count(frame), 1);
        assert!(!vmm.frames().is_free(frame));
        let flags = vmm.lookup(va).unwrap().entry.flags();
        assert!(flags.user_access());
        assert!(!flags.writable());
    }

    #[test]
    fn replacing_a_mapping_releases_the_old_frame() {
        let mem = memory();
        let mut vmm = vmm(&mem);
        let old = vmm.allocate(false).unwrap();
        let new = vmm.allocate(false).unwrap();
        let va = VirtualAddress::new(0x2000);

        vmm.insert(old, va, PageEntryBits::kernel_rw()).unwrap();
        vmm.insert(new, va, PageEntryBits::kernel_rw()).unwrap();
        assert_eq!(vmm.frames().ref_count(old), 0);
        assert!(vmm.frames().is_free(old));
        assert_eq!(vmm.lookup(va).unwrap().frame, new);
        assert_eq!(vmm.mmu().invalidated, [va.page::<Size4K>()]);
    }

    #[test]
    fn remove_frees_with_the_last_reference() {
        let mem = memory();
        let mut vmm = vmm(&mem);
        let frame = vmm.allocate(false).unwrap();
        let (a, b) = (VirtualAddress::new(0x1000), VirtualAddress::new(0x2000));

        vmm.insert(frame, a, PageEntryBits::kernel_rw()).unwrap();
        vmm.insert(frame, b, PageEntryBits::kernel_rw()).unwrap();
        assert_eq!(vmm.frames().ref_count(frame), 2);

        vmm.remove(a);
        assert!(vmm.lookup(a).is_none());
        assert_eq!(vmm.lookup(b).unwrap().frame, frame);
        assert!(!vmm.frames().is_free(frame));

        vmm.remove(b);
        assert!(vmm.frames().is_free(frame));
        assert_eq!(vmm.translate(b), None);

        let before = vmm.mmu().invalidated.len();
        vmm.remove(b);
        assert_eq!(vmm.mmu().invalidated.len(), before);
    }

    #[test]
    fn insert_without_table_memory_changes_nothing() {
        let mem = memory();
        let mut vmm = vmm(&mem);
        let frame = vmm.allocate(false).unwrap();
        let list = vmm.frames_mut().detach_free_list();

        let va = VirtualAddress::new(0x0080_0000);
        assert_eq!(
            vmm.insert(frame, va, PageEntryBits::kernel_rw()),
            Err(VmmError::OutOfMemory { va })
        );
        assert_eq!(vmm.frames().ref_count(frame), 0);
        assert!(vmm.address_space().entry(va).is_none());

        vmm.frames_mut().reattach_free_list(list);
    }

    #[test]
    fn entries_past_managed_memory_are_not_frames() {
        let mem = memory();
        let mut vmm = vmm(&mem);
        // Frame 65 is the directory, outside the 64 managed frames.
        vmm.boot_map_region(
            VirtualAddress::new(0xF000_0000),
            0x0010_0000,
            PhysicalAddress::zero(),
            PageEntryBits::kernel_rw(),
        );
        let va = VirtualAddress::new(0xF000_0000 + (FRAMES + 1) * 4096);

        assert_eq!(
            vmm.translate(va),
            Some(PhysicalPage::<Size4K>::from_number(FRAMES + 1).base())
        );
        assert!(vmm.lookup(va).is_none());
        vmm.remove(va);
        assert!(vmm.translate(va).is_some());
        assert!(vmm.mmu().invalidated.is_empty());

        let frame = vmm.allocate(false).unwrap();
        vmm.insert(frame, va, PageEntryBits::kernel_rw()).unwrap();
        assert_eq!(vmm.lookup(va).unwrap().frame, frame);
        assert_eq!(vmm.frames().ref_count(frame), 1);
    }

    #[test]
    fn boot_map_region_takes_tables_from_the_free_list() {
        let mem = memory();
        let mut vmm = vmm(&mem);
        let free = vmm.frames().free_count();

        vmm.boot_map_region(
            VirtualAddress::new(0xF000_0000),
            0x0080_0000,
            PhysicalAddress::zero(),
            PageEntryBits::kernel_rw(),
        );
        assert_eq!(vmm.frames().free_count(), free - 2);
        assert_eq!(
            vmm.translate(VirtualAddress::new(0xF07F_F123)),
            Some(PhysicalAddress::new(0x007F_F123))
        );
    }
}
