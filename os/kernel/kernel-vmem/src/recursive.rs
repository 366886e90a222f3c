use crate::page_table::pd::{PdEntry, PdIndex};
use crate::PageEntryBits;
use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// The virtual window a self-referencing directory slot creates.
///
/// When slot `K` of a directory links the directory's own frame, the walk
/// through `K` uses the directory as a page table. Consequently:
///
/// - the 4 MiB at `K << 22` show every page table of the space as one flat
///   array of PTEs, indexed by virtual page number;
/// - the page at `(K << 22) + K * 4096` shows the directory itself.
///
/// For the kernel directory `K = PDX(UVPT)` and the link is `PRESENT | USER`,
/// so user code can read, but not write, the paging structures.
///
/// ```rust
/// # use kernel_memory_addresses::VirtualAddress;
/// # use kernel_vmem::RecursiveWindow;
/// let w = RecursiveWindow::kernel();
/// assert_eq!(w.base().as_u32(), 0xEF40_0000);
/// assert_eq!(w.directory_address().as_u32(), 0xEF7B_D000);
/// assert_eq!(w.pte_address(VirtualAddress::new(0x0080_1000)).as_u32(), 0xEF40_2004);
/// ```
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RecursiveWindow {
    slot: PdIndex,
}

impl RecursiveWindow {
    /// The window at `base`, which must be 4 MiB aligned.
    #[inline]
    #[must_use]
    pub const fn at(base: VirtualAddress) -> Self {
        debug_assert!(base.as_u32() & 0x003F_FFFF == 0, "window must be 4 MiB aligned");
        Self {
            slot: PdIndex::from(base),
        }
    }

    /// The kernel's window at `UVPT`.
    #[inline]
    #[must_use]
    pub const fn kernel() -> Self {
        Self::at(VirtualAddress::new(crate::info::UVPT))
    }

    /// The directory slot holding the self-reference.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> PdIndex {
        self.slot
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        self.slot.base()
    }

    /// Where the directory itself appears.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn directory_address(self) -> VirtualAddress {
        VirtualAddress::new(self.base().as_u32() + (self.slot.as_usize() as u32) * 4096)
    }

    /// Where the PTE that maps `va` appears.
    #[inline]
    #[must_use]
    pub const fn pte_address(self, va: VirtualAddress) -> VirtualAddress {
        VirtualAddress::new(self.base().as_u32() + (va.as_u32() >> 12) * 4)
    }

    /// Where the PDE that covers `va` appears.
    #[inline]
    #[must_use]
    pub const fn pde_address(self, va: VirtualAddress) -> VirtualAddress {
        VirtualAddress::new(self.directory_address().as_u32() + (va.as_u32() >> 22) * 4)
    }

    /// The directory entry that must occupy [`slot`](Self::slot) of the
    /// directory in `root`.
    #[inline]
    #[must_use]
    pub const fn entry_for(self, root: PhysicalPage<Size4K>) -> PdEntry {
        PdEntry::make_next(root, PageEntryBits::user_ro())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_covers_one_directory_slot() {
        let w = RecursiveWindow::kernel();
        assert_eq!(w.slot().as_usize(), 0x3BD);
        assert_eq!(w.pte_address(VirtualAddress::new(u32::MAX)).as_u32(), 0xEF7F_FFFC);
        assert_eq!(w.pde_address(VirtualAddress::new(0xF000_0000)).as_u32(), 0xEF7B_DF00);
    }

    #[test]
    fn entry_is_read_only_user_link() {
        let root = PhysicalPage::from_number(0x117);
        assert_eq!(RecursiveWindow::kernel().entry_for(root).raw(), 0x0011_7005);
    }
}
