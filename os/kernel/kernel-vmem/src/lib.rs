//! # Virtual Memory Support
//!
//! 32-bit x86 two-level paging helpers for the kernel's memory core.
//!
//! ## What you get
//! - An [`address space`](address_space) rooted at a page directory, with the
//!   page-table walker, the region mapper and address translation.
//! - x86 paging entry bits ([`PageEntryBits`]) shared by both levels.
//! - 4 KiB-aligned [`PageDirectory`] / [`PageTable`] wrappers and index helpers.
//! - The [`RecursiveWindow`] through which the kernel directory exposes its own
//!   page tables.
//! - Fallible kernel-virtual / physical conversions ([`direct_map`]).
//! - A tiny allocator/mapper/MMU interface ([`FrameAlloc`], [`PhysMapper`], [`Mmu`]).
//!
//! ## x86 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PDX  |  PTX  | Offset |
//! ```
//!
//! The CPU uses `PDX` to select one of 1024 entries of the directory named by
//! `CR3`, and `PTX` to select one of 1024 entries of the page table that entry
//! links. The table entry supplies the frame; the offset selects the byte.
//!
//! ```text
//!  CR3 → PD ──PDX──► PDE → PT ──PTX──► PTE → 4 KiB frame
//! ```
//!
//! | Level | Table name | Entry name | Description |
//! |:------|:-----------|:-----------|:------------|
//! | 1 | **PD** (Page Directory) | **PDE** | Each present entry links a page table covering 4 MiB. |
//! | 2 | **PT** (Page Table) | **PTE** | Each present entry maps one 4 KiB page. |

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod direct_map;
mod mmu;
mod page_entry_bits;
pub mod page_table;
mod recursive;

pub use crate::address_space::{AddressSpace, EntrySlot, MapRegionError};
pub use crate::direct_map::AddressError;
#[cfg(target_arch = "x86")]
pub use crate::mmu::HardwareMmu;
pub use crate::mmu::Mmu;
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
pub use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
pub use crate::recursive::RecursiveWindow;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K};

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// The implementation decides where frames come from and what bookkeeping a
/// table link implies. Frames need not be zeroed; the walker clears them.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame for a page table.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Converts physical addresses to usable pointers in the current virtual
/// address space.
///
/// Typical patterns:
/// - **Kernel**: all physical memory is mapped at `KERNBASE`; add it.
/// - **Tests**: a host allocation stands in for RAM; offset into it.
pub trait PhysMapper {
    /// Convert a *physical* address to a pointer in the current address space.
    ///
    /// Computing the pointer is harmless; dereferencing it is up to the caller.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Borrow the bytes at `pa` as a `T`.
    ///
    /// # Safety
    /// - `pa` must be mapped writable in the current address space.
    /// - Lifetime `'a` is purely borrow-checked; the caller must not create
    ///   overlapping references to the same bytes while this one is alive.
    /// - Type `T` must match the bytes at `pa` and its alignment.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr(pa).cast::<T>() }
    }

    /// Fill the 4 KiB frame `page` with zero bytes.
    ///
    /// # Safety
    /// Nothing may rely on the previous contents of the frame.
    #[inline]
    unsafe fn zero_frame(&self, page: PhysicalPage<Size4K>) {
        unsafe { self.fill_frame(page, 0) }
    }

    /// Fill the 4 KiB frame `page` with `byte`.
    ///
    /// # Safety
    /// Nothing may rely on the previous contents of the frame.
    #[inline]
    unsafe fn fill_frame(&self, page: PhysicalPage<Size4K>, byte: u8) {
        unsafe {
            core::ptr::write_bytes(self.phys_to_ptr(page.base()), byte, Size4K::SIZE as usize);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::address_space::AddressSpace;
    use kernel_memory_addresses::VirtualAddress;

    /// A trivial **bump** allocator: always hands out the next 4 KiB frame.
    pub struct BumpAlloc {
        /// Next free frame number.
        next: u32,
        /// Exclusive end.
        end: u32,
    }

    impl BumpAlloc {
        pub fn new(start: u32, end: u32) -> Self {
            Self { next: start, end }
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
            if self.next >= self.end {
                return None;
            }
            let p = self.next;
            self.next += 1;
            Some(PhysicalPage::from_number(p))
        }
    }

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(align(4096))]
    pub struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

    /// A tiny in-memory "RAM": physical addresses are byte offsets into a
    /// vector of 4 KiB-aligned frames.
    pub struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K([0xAA; 4096]));
            }
            Self { frames: v }
        }
    }

    impl PhysMapper for TestPhys {
        fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
            let idx = (pa.as_u32() >> 12) as usize;
            let off = (pa.as_u32() & 0xfff) as usize;
            let frame = &self.frames[idx] as *const Aligned4K as *mut u8;
            frame.wrapping_add(off)
        }
    }

    /// Fresh address space over `n` frames with a zeroed root in frame 0.
    pub fn space(phys: &TestPhys, n: u32) -> (AddressSpace<'_, TestPhys>, BumpAlloc) {
        let mut alloc = BumpAlloc::new(0, n);
        let root = alloc.alloc_4k().unwrap();
        unsafe { phys.zero_frame(root) };
        (AddressSpace::from_root(phys, root), alloc)
    }

    #[test]
    fn walk_creates_table_once() {
        let phys = TestPhys::with_frames(8);
        let (aspace, mut alloc) = space(&phys, 8);

        let va = VirtualAddress::new(0x0080_3000);
        let slot = aspace.walk(&mut alloc, va, true).expect("walk");
        let pde = aspace.pd_entry(PdIndex::from(va));
        assert!(pde.is_present());
        assert!(pde.flags().writable());
        assert!(pde.flags().user_access());
        assert_eq!(pde.next_table(), Some(slot.table()));
        assert_eq!(slot.index(), PtIndex::new(3));

        // Fresh tables are zeroed even though the backing RAM was not.
        let table = unsafe { phys.phys_to_mut::<PageTable>(slot.table().base()) };
        assert!(table.is_empty());

        let again = aspace.walk(&mut alloc, va + 0x1000, true).expect("walk");
        assert_eq!(again.table(), slot.table());
        assert_eq!(alloc.next, 2);
    }

    #[test]
    fn walk_without_create_is_absent() {
        let phys = TestPhys::with_frames(4);
        let (aspace, mut alloc) = space(&phys, 4);

        assert!(aspace.walk(&mut alloc, VirtualAddress::new(0x1000), false).is_none());
        assert!(aspace.entry(VirtualAddress::new(0x1000)).is_none());
        assert_eq!(alloc.next, 1);
    }

    #[test]
    fn walk_reports_exhaustion_without_side_effects() {
        let phys = TestPhys::with_frames(1);
        let (aspace, mut alloc) = space(&phys, 1);

        let va = VirtualAddress::new(0x0040_0000);
        assert!(aspace.walk(&mut alloc, va, true).is_none());
        assert!(!aspace.pd_entry(PdIndex::from(va)).is_present());
    }

    #[test]
    fn store_and_query_4k() {
        let phys = TestPhys::with_frames(4);
        let (aspace, mut alloc) = space(&phys, 4);

        let va = VirtualAddress::new(0xEF00_0000);
        let pa = PhysicalPage::<Size4K>::from_number(0x300);
        let slot = aspace.walk(&mut alloc, va, true).unwrap();
        aspace.store(slot, PtEntry::make_4k(pa, PageEntryBits::user_ro()));

        assert_eq!(aspace.load(slot).raw(), 0x0030_0005);
        assert_eq!(aspace.query(va + 0x123), Some(PhysicalAddress::new(0x0030_0123)));
        assert_eq!(aspace.query(va + 0x1000), None);
        assert_eq!(aspace.entry(va), Some(slot));
    }
}
