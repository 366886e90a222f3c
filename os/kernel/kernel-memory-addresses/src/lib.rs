//! # Virtual and Physical Memory Addresses (32-bit)
//!
//! Strongly typed wrappers for raw memory addresses and page bases used in
//! two-level x86 paging code.
//!
//! ## Overview
//!
//! This crate defines a minimal set of types that prevent mixing virtual and
//! physical addresses at compile time while remaining zero-cost wrappers around
//! `u32` values.
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory or MMIO regions. |
//!
//! ## Page Sizes
//!
//! - [`Size4K`] — 4 KiB pages, the only leaf size the MMU is driven with.
//! - [`Size4M`] — the 4 MiB span covered by one page table (one directory slot).
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xF010_1234);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0xF010_1000);
//! assert_eq!(page.join(off), va);
//!
//! let pa = PhysicalAddress::new(0x0012_3042);
//! let (pp, po) = pa.split::<Size4K>();
//! assert_eq!(pp.join(po), pa);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use memory_address_offset::MemoryAddressOffset;
pub use memory_page::MemoryPage;
pub use page_size::{PageSize, Size4K, Size4M};
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Round `x` up to the next multiple of the page size `S`.
///
/// Returns `None` if the rounded value does not fit 32 bits.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// assert_eq!(round_up::<Size4K>(0), Some(0));
/// assert_eq!(round_up::<Size4K>(1), Some(4096));
/// assert_eq!(round_up::<Size4K>(4096), Some(4096));
/// assert_eq!(round_up::<Size4K>(u32::MAX), None);
/// ```
#[inline]
#[must_use]
pub const fn round_up<S: PageSize>(x: u32) -> Option<u32> {
    match x.checked_add(S::SIZE - 1) {
        Some(v) => Some(v & !(S::SIZE - 1)),
        None => None,
    }
}

/// Round `x` down to a multiple of the page size `S`.
#[inline]
#[must_use]
pub const fn round_down<S: PageSize>(x: u32) -> u32 {
    x & !(S::SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_4k() {
        let a = MemoryAddress::new(0x89AB_CDEF);
        let (p, o) = a.split::<Size4K>();
        assert_eq!(p.base().as_u32() & 0xFFF, 0);
        assert_eq!(o.as_u32(), 0xDEF);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn split_and_join_4m() {
        let a = MemoryAddress::new(0xEF41_2345);
        let (p, o) = a.split::<Size4M>();
        assert_eq!(p.base().as_u32(), 0xEF40_0000);
        assert_eq!(o.as_u32(), 0x0001_2345);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn virtual_vs_physical_wrappers() {
        let va = VirtualAddress::new(0xF000_1234);
        let (vp, vo) = va.split::<Size4K>();
        assert_eq!(vp.base().as_u32(), 0xF000_1000);
        assert_eq!(vo.as_u32(), 0x234);
        assert_eq!(vp.join(vo), va);

        let pa = PhysicalAddress::new(0x0010_0042);
        let (pp, po) = pa.split::<Size4K>();
        assert_eq!(pp.base().as_u32(), 0x0010_0000);
        assert_eq!(po.as_u32(), 0x42);
        assert_eq!(pp.join(po), pa);
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u32(), 0x12000);
        assert_eq!(a.page::<Size4K>().base().as_u32(), 0x12000);
        assert_eq!(a.offset::<Size4K>().as_u32(), 0x345);
        assert_eq!(round_down::<Size4M>(0xF03F_FFFF), 0xF000_0000);
        assert_eq!(round_up::<Size4M>(1), Some(Size4M::SIZE));
    }

    #[test]
    fn checked_arithmetic_detects_wraparound() {
        let top = VirtualAddress::new(0xFFFF_F000);
        assert_eq!(top.checked_add(0xFFF), Some(VirtualAddress::new(0xFFFF_FFFF)));
        assert_eq!(top.checked_add(0x1000), None);
    }

    #[test]
    fn page_number_roundtrip() {
        let pp = PhysicalPage::<Size4K>::from_number(0x123);
        assert_eq!(pp.base().as_u32(), 0x0012_3000);
        assert_eq!(pp.number(), 0x123);
    }
}
