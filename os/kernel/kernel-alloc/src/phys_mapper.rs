//! # Physical Mappers
//!
//! [`PhysMapper`] implementations: how the memory core reaches a physical
//! address from code that can only dereference virtual ones.
//!
//! - [`KernBasePhysMapper`]: the kernel maps all physical memory at
//!   `KERNBASE`, so physical address `pa` is visible at `KERNBASE + pa`, up
//!   to the 256 MiB the direct map can reach.
//! - [`HostedPhysMemory`] (feature `hosted`): a page-aligned host allocation
//!   plays the part of RAM, with physical address `pa` at byte offset `pa`.
//!   This lets the whole memory core run as an ordinary process.
//!
//! ## Example
//! ```rust
//! use kernel_alloc::phys_mapper::KernBasePhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::PhysMapper;
//!
//! let ptr = KernBasePhysMapper.phys_to_ptr(PhysicalAddress::new(0x0123_4000));
//! assert_eq!(ptr as usize, 0xF123_4000);
//! ```

use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;
use kernel_vmem::direct_map::{DIRECT_MAP_FRAMES, kernel_virtual_of};

/// [`PhysMapper`] for the kernel's direct map of physical memory at `KERNBASE`.
///
/// # Safety
/// Dereferencing the produced pointers requires the direct map to cover the
/// address. Early in boot, before the kernel directory is active, that holds
/// only for whatever the boot loader mapped.
#[derive(Debug, Copy, Clone, Default)]
pub struct KernBasePhysMapper;

impl PhysMapper for KernBasePhysMapper {
    /// # Panics
    /// If `pa` lies beyond the reach of the direct map.
    #[inline]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        match kernel_virtual_of(pa, DIRECT_MAP_FRAMES) {
            Ok(va) => va.as_u32() as usize as *mut u8,
            Err(e) => panic!("no direct mapping: {e}"),
        }
    }
}

#[cfg(any(test, feature = "hosted"))]
pub use hosted::HostedPhysMemory;

#[cfg(any(test, feature = "hosted"))]
mod hosted {
    use core::ptr::NonNull;
    use kernel_info::memory::PGSIZE;
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_vmem::PhysMapper;
    use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};

    /// Simulated physical memory backed by a zeroed, page-aligned host allocation.
    pub struct HostedPhysMemory {
        base: NonNull<u8>,
        layout: Layout,
    }

    impl HostedPhysMemory {
        /// Allocate `frame_count` frames of zeroed memory.
        ///
        /// # Panics
        /// If `frame_count` is zero or the host cannot provide the memory.
        #[must_use]
        pub fn new(frame_count: u32) -> Self {
            assert!(frame_count > 0, "simulated memory needs at least one frame");
            let Ok(layout) =
                Layout::from_size_align(frame_count as usize * PGSIZE as usize, PGSIZE as usize)
            else {
                panic!("cannot simulate {frame_count} frames");
            };
            let Some(base) = NonNull::new(unsafe { alloc_zeroed(layout) }) else {
                handle_alloc_error(layout);
            };
            Self { base, layout }
        }

        #[inline]
        #[must_use]
        #[allow(clippy::cast_possible_truncation)]
        pub const fn frame_count(&self) -> u32 {
            (self.layout.size() / PGSIZE as usize) as u32
        }

        /// Size of the simulated memory in bytes.
        #[inline]
        #[must_use]
        pub const fn size(&self) -> usize {
            self.layout.size()
        }
    }

    impl PhysMapper for HostedPhysMemory {
        /// # Panics
        /// If `pa` lies outside the simulated memory.
        fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
            assert!(
                pa.as_usize() < self.size(),
                "{pa} is outside the {} simulated frames",
                self.frame_count()
            );
            unsafe { self.base.as_ptr().add(pa.as_usize()) }
        }
    }

    impl Drop for HostedPhysMemory {
        fn drop(&mut self) {
            unsafe { dealloc(self.base.as_ptr(), self.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_memory_addresses::PhysicalPage;

    #[test]
    fn direct_map_reaches_its_last_frame() {
        let ptr = KernBasePhysMapper.phys_to_ptr(PhysicalAddress::new(0x0FFF_F000));
        assert_eq!(ptr as usize, 0xFFFF_F000);
    }

    #[test]
    #[should_panic(expected = "beyond physical memory")]
    fn direct_map_does_not_wrap() {
        let _ = KernBasePhysMapper.phys_to_ptr(PhysicalAddress::new(0x1000_5000));
    }

    #[test]
    fn hosted_memory_is_zeroed_and_page_aligned() {
        let mem = HostedPhysMemory::new(4);
        assert_eq!(mem.frame_count(), 4);
        let frame = mem.phys_to_ptr(PhysicalAddress::new(0x2000));
        assert_eq!(frame as usize % 4096, 0);
        let bytes = unsafe { mem.phys_to_mut::<[u8; 4096]>(PhysicalAddress::new(0x2000)) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn frames_do_not_alias() {
        let mem = HostedPhysMemory::new(2);
        unsafe { mem.fill_frame(PhysicalPage::from_number(1), 0xCC) };
        let first = unsafe { mem.phys_to_mut::<[u8; 4096]>(PhysicalAddress::zero()) };
        let second = unsafe { mem.phys_to_mut::<[u8; 4096]>(PhysicalAddress::new(0x1000)) };
        assert!(first.iter().all(|&b| b == 0));
        assert!(second.iter().all(|&b| b == 0xCC));
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn out_of_range_access_panics() {
        let mem = HostedPhysMemory::new(1);
        let _ = mem.phys_to_ptr(PhysicalAddress::new(0x1000));
    }
}
