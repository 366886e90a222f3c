//! # Boot Bump Allocator
//!
//! Hands out page-aligned physical memory directly after the kernel image
//! while nothing better exists. Allocations are never returned; once the
//! frame table has been built the allocator is retired with
//! [`BootAllocator::into_cursor`] and everything below the cursor stays
//! reserved for good.

use kernel_memory_addresses::{PhysicalAddress, Size4K, round_up};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootAllocError {
    /// The request would run past the end of physical memory.
    #[error("boot allocator exhausted: {requested:#x} bytes requested at {cursor}")]
    Exhausted {
        requested: u32,
        cursor: PhysicalAddress,
    },
}

/// A bump allocator over `[kernel_end, frame_count * 4096)`.
#[derive(Debug)]
pub struct BootAllocator {
    next: u32,
    frame_count: u32,
}

impl BootAllocator {
    /// Start allocating at the first page boundary at or after `kernel_end`.
    ///
    /// # Panics
    /// If `kernel_end` lies in the last page of the address space.
    #[must_use]
    pub const fn new(kernel_end: PhysicalAddress, frame_count: u32) -> Self {
        let Some(next) = round_up::<Size4K>(kernel_end.as_u32()) else {
            panic!("kernel image ends at the top of the address space");
        };
        Self { next, frame_count }
    }

    /// The next address that would be handed out.
    #[inline]
    #[must_use]
    pub const fn cursor(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.next)
    }

    /// Reserve `n` bytes, rounded up to whole pages, and return their start.
    ///
    /// `allocate(0)` reports the cursor without moving it. The memory is not
    /// cleared.
    ///
    /// # Errors
    /// [`BootAllocError::Exhausted`] if the reservation would end past the last
    /// frame of physical memory. The cursor is left unchanged.
    pub const fn allocate(&mut self, n: u32) -> Result<PhysicalAddress, BootAllocError> {
        let exhausted = BootAllocError::Exhausted {
            requested: n,
            cursor: self.cursor(),
        };
        let Some(size) = round_up::<Size4K>(n) else {
            return Err(exhausted);
        };
        let Some(end) = self.next.checked_add(size) else {
            return Err(exhausted);
        };
        if (end >> 12) > self.frame_count {
            return Err(exhausted);
        }

        let start = self.next;
        self.next = end;
        Ok(PhysicalAddress::new(start))
    }

    /// Retire the allocator, returning the first address it never handed out.
    #[inline]
    #[must_use]
    pub const fn into_cursor(self) -> PhysicalAddress {
        self.cursor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_page_aligned_and_contiguous() {
        let mut boot = BootAllocator::new(PhysicalAddress::new(0x0010_F123), 1024);
        assert_eq!(boot.allocate(0).unwrap().as_u32(), 0x0011_0000);
        assert_eq!(boot.allocate(1).unwrap().as_u32(), 0x0011_0000);
        assert_eq!(boot.allocate(4096).unwrap().as_u32(), 0x0011_1000);
        assert_eq!(boot.allocate(0).unwrap().as_u32(), 0x0011_2000);
        assert_eq!(boot.into_cursor().as_u32(), 0x0011_2000);
    }

    #[test]
    fn refuses_to_run_past_physical_memory() {
        let mut boot = BootAllocator::new(PhysicalAddress::new(0x003F_E000), 1024);
        assert!(boot.allocate(0x2000).is_ok());
        assert_eq!(
            boot.allocate(1),
            Err(BootAllocError::Exhausted {
                requested: 1,
                cursor: PhysicalAddress::new(0x0040_0000)
            })
        );
        assert_eq!(boot.allocate(0).unwrap().as_u32(), 0x0040_0000);
        assert!(boot.allocate(u32::MAX).is_err());
    }
}
