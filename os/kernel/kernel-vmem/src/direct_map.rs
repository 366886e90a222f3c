//! # Kernel Direct Map
//!
//! All physical memory is mapped at `KERNBASE`: the kernel virtual address of
//! physical address `pa` is `KERNBASE + pa`. These conversions check their
//! input and return an [`AddressError`] instead of halting, so a caller can
//! decide whether a bad address is fatal.

use crate::info::{KERNBASE, PGSHIFT};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Number of frames the direct map can reach: everything from `KERNBASE` to
/// the top of the address space.
pub const DIRECT_MAP_FRAMES: u32 = 0u32.wrapping_sub(KERNBASE) >> PGSHIFT;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AddressError {
    /// The address is not inside the kernel's direct map.
    #[error("{va} is not a kernel virtual address")]
    NotKernelVirtual { va: VirtualAddress },
    /// The address is past the last frame of physical memory.
    #[error("{pa} is beyond physical memory ({frame_count} frames)")]
    BeyondPhysicalMemory { pa: PhysicalAddress, frame_count: u32 },
}

/// Physical address behind the direct-map address `kva`.
///
/// # Errors
/// [`AddressError::NotKernelVirtual`] if `kva` is below `KERNBASE`.
///
/// ```rust
/// # use kernel_memory_addresses::VirtualAddress;
/// # use kernel_vmem::direct_map::physical_of;
/// assert_eq!(physical_of(VirtualAddress::new(0xF010_0000)).unwrap().as_u32(), 0x0010_0000);
/// assert!(physical_of(VirtualAddress::new(0xEFFF_FFFF)).is_err());
/// ```
#[inline]
pub const fn physical_of(kva: VirtualAddress) -> Result<PhysicalAddress, AddressError> {
    if kva.as_u32() < KERNBASE {
        return Err(AddressError::NotKernelVirtual { va: kva });
    }
    Ok(PhysicalAddress::new(kva.as_u32() - KERNBASE))
}

/// Direct-map address of `pa`, given a machine with `frame_count` frames.
///
/// # Errors
/// [`AddressError::BeyondPhysicalMemory`] if `pa` lies in a frame at or past
/// `frame_count`, or outside what the direct map can reach.
#[inline]
pub const fn kernel_virtual_of(
    pa: PhysicalAddress,
    frame_count: u32,
) -> Result<VirtualAddress, AddressError> {
    if (pa.as_u32() >> 12) >= frame_count {
        return Err(AddressError::BeyondPhysicalMemory { pa, frame_count });
    }
    match KERNBASE.checked_add(pa.as_u32()) {
        Some(va) => Ok(VirtualAddress::new(va)),
        None => Err(AddressError::BeyondPhysicalMemory { pa, frame_count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_virtual_respects_frame_count() {
        let pa = PhysicalAddress::new(0x003F_F123);
        assert_eq!(kernel_virtual_of(pa, 1024).unwrap().as_u32(), 0xF03F_F123);
        assert_eq!(
            kernel_virtual_of(PhysicalAddress::new(0x0040_0000), 1024),
            Err(AddressError::BeyondPhysicalMemory {
                pa: PhysicalAddress::new(0x0040_0000),
                frame_count: 1024
            })
        );
    }

    #[test]
    fn direct_map_ceiling() {
        assert_eq!(DIRECT_MAP_FRAMES, 0x1_0000);
        let pa = PhysicalAddress::new(0x1000_0000);
        assert!(kernel_virtual_of(pa, u32::MAX).is_err());
        assert!(kernel_virtual_of(pa, DIRECT_MAP_FRAMES).is_err());
        let last = PhysicalAddress::new(0x0FFF_F000);
        assert_eq!(kernel_virtual_of(last, DIRECT_MAP_FRAMES).unwrap().as_u32(), 0xFFFF_F000);
        assert_eq!(physical_of(VirtualAddress::new(u32::MAX)).unwrap().as_u32(), 0x0FFF_FFFF);
    }
}
