//! # Kernel Memory Bring-Up
//!
//! Owns the kernel's physical and virtual memory once it is set up, and sets
//! it up: [`initialize_memory`] probes installed memory, builds the kernel
//! page directory, the frame table and the environment table, maps the
//! kernel's view of the world and turns on paging.
//!
//! ## Kernel directory after bring-up
//!
//! ```text
//!    4 GiB ┌──────────────────────────────┐
//!          │ physical memory, kernel RW   │
//! KERNBASE ├──────────────────────────────┤ KSTACKTOP
//!          │ boot stack, kernel RW        │ KSTKSIZE
//!          │ guard, unmapped              │ KSTKGAP
//!  MMIOLIM ├──────────────────────────────┤
//!          │ (unmapped)                   │
//!     ULIM ├──────────────────────────────┤
//!          │ page tables, user RO         │ recursive slot
//!     UVPT ├──────────────────────────────┤
//!          │ frame table, user RO         │
//!   UPAGES ├──────────────────────────────┤
//!          │ environments, user RO        │
//!    UENVS ├──────────────────────────────┤ UTOP
//!          │ (empty)                      │
//!        0 └──────────────────────────────┘
//! ```
//!
//! Every step is followed by an invariant check from [`check`]; any violation
//! panics.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod check;

use kernel_alloc::bootmem::BootAllocator;
use kernel_alloc::frame_table::{FrameDescriptor, FrameTable};
use kernel_alloc::probe::{Nvram, PhysicalMemory, detect_memory};
use kernel_alloc::vmm::Vmm;
use kernel_info::memory::{
    ENV_RECORD_SIZE, KERNBASE, KSTACKTOP, KSTKSIZE, NENV, PGSIZE, PTSIZE, UENVS, UPAGES,
};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::direct_map::DIRECT_MAP_FRAMES;
use kernel_vmem::{AddressSpace, Mmu, PageEntryBits, PhysMapper, RecursiveWindow};
use log::info;

pub use kernel_alloc::frame_table::FrameNumber;
pub use kernel_alloc::vmm::{Mapping, VmmError};

/// Where the boot loader left the kernel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootImage {
    /// First physical address past the loaded kernel image.
    pub kernel_end: PhysicalAddress,
    /// Physical base of the `KSTKSIZE` bytes of boot stack; page-aligned.
    pub boot_stack: PhysicalAddress,
}

/// The kernel's memory after [`initialize_memory`].
pub struct MemoryManager<'m, M: PhysMapper, U: Mmu> {
    vmm: Vmm<'m, M, U>,
    memory: PhysicalMemory,
    boot_cursor: PhysicalAddress,
    frame_table: PhysicalAddress,
    environments: PhysicalAddress,
    boot_stack: PhysicalAddress,
}

impl<'m, M: PhysMapper, U: Mmu> MemoryManager<'m, M, U> {
    #[inline]
    pub const fn vmm(&self) -> &Vmm<'m, M, U> {
        &self.vmm
    }

    #[inline]
    pub const fn vmm_mut(&mut self) -> &mut Vmm<'m, M, U> {
        &mut self.vmm
    }

    /// Installed memory as probed at bring-up.
    #[inline]
    pub const fn memory(&self) -> PhysicalMemory {
        self.memory
    }

    /// Frames covered by the frame table; installed memory beyond the reach
    /// of the direct map is left unused.
    #[inline]
    pub const fn managed_frames(&self) -> u32 {
        self.vmm.frames().frame_count()
    }

    /// Physical page of the kernel page directory.
    #[inline]
    pub const fn root(&self) -> PhysicalPage<Size4K> {
        self.vmm.address_space().root_page()
    }

    /// First physical address the boot allocator never handed out.
    #[inline]
    pub const fn boot_cursor(&self) -> PhysicalAddress {
        self.boot_cursor
    }

    /// Physical base of the frame descriptor table.
    #[inline]
    pub const fn frame_table(&self) -> PhysicalAddress {
        self.frame_table
    }

    /// Physical base of the environment table.
    #[inline]
    pub const fn environments(&self) -> PhysicalAddress {
        self.environments
    }

    #[inline]
    pub const fn boot_stack(&self) -> PhysicalAddress {
        self.boot_stack
    }

    /// Bytes occupied by the frame descriptor table.
    #[inline]
    pub const fn frame_table_size(&self) -> u32 {
        frame_table_size(self.managed_frames())
    }
}

#[allow(clippy::cast_possible_truncation)]
const fn frame_table_size(frame_count: u32) -> u32 {
    let Some(size) = frame_count.checked_mul(size_of::<FrameDescriptor>() as u32) else {
        panic!("frame table size overflows");
    };
    size
}

/// Size of the environment table.
pub const ENVIRONMENTS_SIZE: u32 = NENV * ENV_RECORD_SIZE;

/// Installed frames the kernel can reach through the direct map.
fn reachable_frames(memory: PhysicalMemory) -> u32 {
    let frame_count = memory.frame_count().min(DIRECT_MAP_FRAMES);
    if frame_count < memory.frame_count() {
        info!(
            "Managing {frame_count} of {} frames; the rest lies beyond the direct map",
            memory.frame_count()
        );
    }
    frame_count
}

fn boot_allocate(boot: &mut BootAllocator, size: u32, what: &str) -> PhysicalAddress {
    match boot.allocate(size) {
        Ok(pa) => pa,
        Err(e) => panic!("cannot allocate the {what}: {e}"),
    }
}

/// Set up the kernel's physical and virtual memory and switch to it.
///
/// # Panics
/// If memory runs out during bring-up or any invariant check fails.
///
/// # Safety
/// - `mapper` must reach all installed physical memory, writably, both before
///   and after the new directory becomes active.
/// - `image` must describe the running kernel; its stack must be the one in use.
/// - Nothing else may use physical memory past `image.kernel_end`.
pub unsafe fn initialize_memory<'m, M: PhysMapper, N: Nvram, U: Mmu>(
    mapper: &'m M,
    nvram: &mut N,
    mmu: U,
    image: BootImage,
) -> MemoryManager<'m, M, U> {
    let memory = detect_memory(nvram);
    let frame_count = reachable_frames(memory);
    let mut boot = BootAllocator::new(image.kernel_end, frame_count);

    let root = boot_allocate(&mut boot, PGSIZE, "kernel page directory").page::<Size4K>();
    unsafe { mapper.zero_frame(root) };
    let aspace = AddressSpace::from_root(mapper, root);
    aspace.install_recursive(RecursiveWindow::kernel());

    let table_size = frame_table_size(frame_count);
    assert!(
        table_size <= PTSIZE,
        "frame table of {table_size:#x} bytes does not fit below UVPT"
    );
    let frame_table = boot_allocate(&mut boot, table_size, "frame table");

    let environments = boot_allocate(&mut boot, ENVIRONMENTS_SIZE, "environment table");
    unsafe {
        core::ptr::write_bytes(mapper.phys_to_ptr(environments), 0, ENVIRONMENTS_SIZE as usize);
    }

    let boot_cursor = boot.into_cursor();
    let mut frames = unsafe { FrameTable::from_physical(mapper, frame_table, frame_count) };
    frames.initialize_free_list(boot_cursor);
    info!(
        "Boot allocations end at {boot_cursor}; {} frames free",
        frames.free_count()
    );

    let mut mm = MemoryManager {
        vmm: Vmm::new(aspace, frames, mmu),
        memory,
        boot_cursor,
        frame_table,
        environments,
        boot_stack: image.boot_stack,
    };

    check::check_free_list(&mut mm, true);
    check::check_frame_allocator(&mut mm);
    check::check_mappings(&mut mm);

    let vmm = &mut mm.vmm;
    vmm.boot_map_region(VirtualAddress::new(UPAGES), PTSIZE, frame_table, PageEntryBits::user_ro());
    vmm.boot_map_region(VirtualAddress::new(UENVS), PTSIZE, environments, PageEntryBits::user_ro());
    vmm.boot_map_region(
        VirtualAddress::new(KSTACKTOP - KSTKSIZE),
        KSTKSIZE,
        image.boot_stack,
        PageEntryBits::kernel_rw(),
    );
    vmm.boot_map_region(
        VirtualAddress::new(KERNBASE),
        0u32.wrapping_sub(KERNBASE),
        PhysicalAddress::zero(),
        PageEntryBits::kernel_rw(),
    );
    check::check_kernel_directory(&mm);

    unsafe { mm.vmm.mmu_mut().activate(root) };
    info!("Kernel page directory {root} active");
    check::check_free_list(&mut mm, false);

    unsafe { mm.vmm.mmu_mut().enable_paging() };
    check::check_installed_directory(&mut mm);

    info!(
        "Memory initialized: {} of {} frames free",
        mm.vmm.frames().free_count(),
        frame_count
    );
    mm
}
