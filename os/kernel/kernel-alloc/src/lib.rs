//! # Kernel Physical Memory Allocation and Mapping
//!
//! Physical memory bookkeeping for the kernel and the reference-counted
//! mapping layer built on top of it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                Virtual Memory Manager (VMM)         │
//! │    • insert / lookup / remove of single pages       │
//! │    • reference counting of mapped frames            │
//! │    • TLB invalidation                               │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Physical Mapper                        │
//! │    • KERNBASE direct map (kernel)                   │
//! │    • Host allocation standing in for RAM (tests)    │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Frame Descriptor Table                    │
//! │    • one descriptor per 4 KiB frame                 │
//! │    • LIFO free list threaded through descriptors    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! Before the frame table exists, memory is carved off the end of the kernel
//! image by the [`bootmem`] bump allocator, and the amount of installed memory
//! comes from the CMOS [`probe`].
//!
//! ## Usage
//!
//! ```rust
//! use kernel_alloc::frame_table::{FrameDescriptor, FrameTable};
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let mut descriptors = [FrameDescriptor::default(); 512];
//! let mut frames = FrameTable::new(&mut descriptors);
//! frames.initialize_free_list(PhysicalAddress::new(0x0012_0000));
//! assert_eq!(frames.free_count(), 159 + (512 - 0x120));
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(feature = "hosted", not(any(test, doctest))))]
extern crate std;

pub mod bootmem;
pub mod frame_table;
pub mod phys_mapper;
pub mod probe;
pub mod vmm;
