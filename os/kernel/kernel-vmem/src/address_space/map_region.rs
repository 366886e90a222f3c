//! # Region Mapping
//!
//! [`AddressSpace::map_region`] maps a contiguous virtual range onto a
//! contiguous physical range with one set of permissions. It is meant for
//! building the kernel's static mappings: it neither looks at nor adjusts any
//! frame's reference count, and it overwrites whatever entries it walks over.

use crate::page_table::pt::PtEntry;
use crate::{AddressSpace, FrameAlloc, PageEntryBits, PhysMapper};
use kernel_memory_addresses::{PageSize, PhysicalAddress, Size4K, VirtualAddress, round_up};
use log::debug;

/// Why [`AddressSpace::map_region`] stopped.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum MapRegionError {
    /// No frame was available for a page table covering `va`.
    #[error("out of memory creating a page table for {va}")]
    OutOfMemory { va: VirtualAddress },
    /// Region endpoints must be page-aligned.
    #[error("unaligned region {va} -> {pa}")]
    Unaligned {
        va: VirtualAddress,
        pa: PhysicalAddress,
    },
    /// The region would run past the end of the 32-bit address space.
    #[error("region of {size:#x} bytes at {va} -> {pa} wraps around")]
    Overflow {
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u32,
    },
}

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Map `[va, va + size)` to `[pa, pa + size)` with `perm | PRESENT`.
    ///
    /// `size` is rounded up to whole pages; a zero size maps nothing. Missing
    /// page tables are created through `alloc`.
    ///
    /// # Errors
    /// - [`MapRegionError::Unaligned`] if `va` or `pa` is not page-aligned.
    /// - [`MapRegionError::Overflow`] if either range leaves the address space.
    /// - [`MapRegionError::OutOfMemory`] if a page table could not be
    ///   allocated. Pages before the failing one stay mapped.
    pub fn map_region<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        size: u32,
        pa: PhysicalAddress,
        perm: PageEntryBits,
    ) -> Result<(), MapRegionError> {
        if !va.is_aligned::<Size4K>() || !pa.is_aligned::<Size4K>() {
            return Err(MapRegionError::Unaligned { va, pa });
        }

        let overflow = MapRegionError::Overflow { va, pa, size };
        let size = round_up::<Size4K>(size).ok_or(overflow)?;
        if size == 0 {
            return Ok(());
        }
        va.checked_add(size - 1).ok_or(overflow)?;
        pa.checked_add(size - 1).ok_or(overflow)?;

        debug!("Mapping {va} -> {pa}, {size:#x} bytes, permissions {:#05x}", perm.into_bits());

        let perm = perm.permissions();
        for offset in (0..size).step_by(Size4K::SIZE as usize) {
            let page_va = va + offset;
            let slot = self
                .walk(alloc, page_va, true)
                .ok_or(MapRegionError::OutOfMemory { va: page_va })?;
            self.store(slot, PtEntry::make_4k((pa + offset).page(), perm));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{TestPhys, space};

    #[test]
    fn maps_every_page_of_the_rounded_size() {
        let phys = TestPhys::with_frames(4);
        let (aspace, mut alloc) = space(&phys, 4);

        let va = VirtualAddress::new(0xF000_0000);
        aspace
            .map_region(
                &mut alloc,
                va,
                3 * 4096 + 1,
                PhysicalAddress::new(0x0010_0000),
                PageEntryBits::kernel_rw(),
            )
            .expect("map_region");

        for i in 0..4 {
            let pa = aspace.query(va + i * 4096 + 8).expect("mapped");
            assert_eq!(pa.as_u32(), 0x0010_0000 + i * 4096 + 8);
            let slot = aspace.entry(va + i * 4096).unwrap();
            assert_eq!(aspace.load(slot).flags().permissions().into_bits(), 0x003);
        }
        assert_eq!(aspace.query(va + 4 * 4096), None);
    }

    #[test]
    fn spans_directory_slots() {
        let phys = TestPhys::with_frames(4);
        let (aspace, mut alloc) = space(&phys, 4);

        let va = VirtualAddress::new(0x003F_F000);
        aspace
            .map_region(
                &mut alloc,
                va,
                2 * 4096,
                PhysicalAddress::new(0x5000),
                PageEntryBits::user_ro(),
            )
            .unwrap();
        assert_eq!(aspace.query(va), Some(PhysicalAddress::new(0x5000)));
        assert_eq!(aspace.query(va + 4096), Some(PhysicalAddress::new(0x6000)));
        assert_ne!(
            aspace.entry(va).unwrap().table(),
            aspace.entry(va + 4096).unwrap().table()
        );
    }

    #[test]
    fn maps_up_to_the_top_of_the_address_space() {
        let phys = TestPhys::with_frames(4);
        let (aspace, mut alloc) = space(&phys, 4);

        let va = VirtualAddress::new(0xFFFF_E000);
        aspace
            .map_region(
                &mut alloc,
                va,
                0x2000,
                PhysicalAddress::zero(),
                PageEntryBits::kernel_rw(),
            )
            .unwrap();
        assert_eq!(
            aspace.query(VirtualAddress::new(u32::MAX)),
            Some(PhysicalAddress::new(0x1FFF))
        );
    }

    #[test]
    fn rejects_unaligned_and_wrapping_regions() {
        let phys = TestPhys::with_frames(2);
        let (aspace, mut alloc) = space(&phys, 2);

        let err = aspace
            .map_region(
                &mut alloc,
                VirtualAddress::new(0x1001),
                4096,
                PhysicalAddress::zero(),
                PageEntryBits::kernel_rw(),
            )
            .unwrap_err();
        assert!(matches!(err, MapRegionError::Unaligned { .. }));

        let err = aspace
            .map_region(
                &mut alloc,
                VirtualAddress::new(0xFFFF_F000),
                0x2000,
                PhysicalAddress::zero(),
                PageEntryBits::kernel_rw(),
            )
            .unwrap_err();
        assert!(matches!(err, MapRegionError::Overflow { .. }));
    }

    #[test]
    fn reports_the_page_that_ran_out_of_tables() {
        let phys = TestPhys::with_frames(2);
        let (aspace, mut alloc) = space(&phys, 2);

        let va = VirtualAddress::new(0x003F_F000);
        let err = aspace
            .map_region(
                &mut alloc,
                va,
                2 * 4096,
                PhysicalAddress::zero(),
                PageEntryBits::kernel_rw(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            MapRegionError::OutOfMemory {
                va: VirtualAddress::new(0x0040_0000)
            }
        );
        assert!(aspace.query(va).is_some());
    }
}
