//! # Invariant Checks
//!
//! Self-tests run by [`initialize_memory`](crate::initialize_memory) at fixed
//! points of bring-up. Each one either returns quietly or panics with a
//! description of the violated invariant. They leave the free list with the
//! same frames on it as they found, though not in the same order.

use crate::{ENVIRONMENTS_SIZE, FrameNumber, MemoryManager};
use kernel_alloc::vmm::Vmm;
use kernel_info::memory::{
    EXTPHYSMEM, IOPHYSMEM, KERNBASE, KSTACKTOP, KSTKGAP, KSTKSIZE, PGSHIFT, PGSIZE, PTSIZE,
    UENVS, UPAGES, UVPT,
};
use kernel_memory_addresses::{PhysicalAddress, Size4K, VirtualAddress, round_up};
use kernel_vmem::{
    Mmu, PageEntryBits, PageTable, PdEntry, PdIndex, PhysMapper, PtIndex, RecursiveWindow,
};
use log::info;

/// Byte written over free frames, so that stale data shows up in a dump.
const POISON: u8 = 0x97;

/// Frames mapped by the boot loader's provisional directory.
const LOW_MEMORY_FRAMES: u32 = PTSIZE >> PGSHIFT;

fn take<M: PhysMapper, U: Mmu>(vmm: &mut Vmm<'_, M, U>) -> FrameNumber {
    vmm.allocate(false)
        .unwrap_or_else(|| panic!("out of memory with {} frames free", vmm.frames().free_count()))
}

fn frame_of<M: PhysMapper, U: Mmu>(vmm: &Vmm<'_, M, U>, va: u32) -> Option<FrameNumber> {
    vmm.translate(VirtualAddress::new(va))
        .map(FrameNumber::containing)
}

fn translate<M: PhysMapper, U: Mmu>(vmm: &Vmm<'_, M, U>, va: u32) -> Option<PhysicalAddress> {
    vmm.translate(VirtualAddress::new(va))
}

fn pte_flags<M: PhysMapper, U: Mmu>(vmm: &Vmm<'_, M, U>, va: u32) -> PageEntryBits {
    let slot = vmm
        .address_space()
        .entry(VirtualAddress::new(va))
        .unwrap_or_else(|| panic!("no page table for {va:#010x}"));
    vmm.address_space().load(slot).flags()
}

/// Read the word at `va` through the directory's translation.
fn read_word<M: PhysMapper, U: Mmu>(vmm: &Vmm<'_, M, U>, va: VirtualAddress) -> u32 {
    let pa = vmm
        .translate(va)
        .unwrap_or_else(|| panic!("{va} is not mapped"));
    unsafe { *vmm.mapper().phys_to_mut::<u32>(pa) }
}

fn write_word<M: PhysMapper, U: Mmu>(vmm: &Vmm<'_, M, U>, va: VirtualAddress, value: u32) {
    let pa = vmm
        .translate(va)
        .unwrap_or_else(|| panic!("{va} is not mapped"));
    unsafe { *vmm.mapper().phys_to_mut::<u32>(pa) = value };
}

fn pd_entry<M: PhysMapper, U: Mmu>(vmm: &Vmm<'_, M, U>, va: u32) -> PdEntry {
    vmm.address_space()
        .pd_entry(PdIndex::from(VirtualAddress::new(va)))
}

/// Validate the free list.
///
/// With `only_low_memory` set, the list is first reordered so that frames in
/// the low 4 MiB come first, and only those are poisoned; everything else may
/// not be reachable yet.
pub fn check_free_list<M: PhysMapper, U: Mmu>(
    mm: &mut MemoryManager<'_, M, U>,
    only_low_memory: bool,
) {
    let boot_cursor = mm.boot_cursor.as_u32();
    let vmm = &mut mm.vmm;
    let mapper = vmm.mapper();

    let limit = if only_low_memory {
        LOW_MEMORY_FRAMES
    } else {
        u32::MAX
    };
    assert!(vmm.frames().free_head().is_some(), "the free list is empty");
    if only_low_memory {
        vmm.frames_mut().prioritize_below(FrameNumber::new(limit));
    }

    let frames = vmm.frames();
    let frame_count = frames.frame_count();
    let mut visited = 0;
    let (mut base, mut extended) = (0, 0);
    for frame in frames.free_frames() {
        visited += 1;
        assert!(visited <= frame_count, "the free list has a cycle");
        assert!(frame.as_u32() < frame_count, "{frame} is past the end of memory");
        assert_eq!(frames.ref_count(frame), 0, "{frame} is free but referenced");

        let pa = frame.base().as_u32();
        assert_ne!(pa, 0, "frame 0 is on the free list");
        assert!(!(IOPHYSMEM..EXTPHYSMEM).contains(&pa), "{frame} lies in the I/O hole");
        assert!(pa < EXTPHYSMEM || pa >= boot_cursor, "{frame} holds kernel or boot data");

        if frame.as_u32() < limit {
            unsafe { mapper.fill_frame(frame.page(), POISON) };
        }
        if pa < EXTPHYSMEM {
            base += 1;
        } else {
            extended += 1;
        }
    }

    assert!(base > 0, "no free frame in base memory");
    assert!(extended > 0, "no free frame in extended memory");
    assert_eq!(visited, frames.free_count(), "free count out of sync");
    info!("Free list check succeeded ({visited} frames)");
}

/// Exercise allocation, exhaustion, zero-filling and freeing.
pub fn check_frame_allocator<M: PhysMapper, U: Mmu>(mm: &mut MemoryManager<'_, M, U>) {
    let vmm = &mut mm.vmm;
    let mapper = vmm.mapper();
    let free = vmm.frames().free_count();
    let frame_count = vmm.frames().frame_count();

    let pp0 = take(vmm);
    let pp1 = take(vmm);
    let pp2 = take(vmm);
    assert!(pp0 != pp1 && pp1 != pp2 && pp0 != pp2, "allocator handed out a frame twice");
    for pp in [pp0, pp1, pp2] {
        assert!(pp.as_u32() < frame_count, "{pp} is past the end of memory");
    }

    let list = vmm.frames_mut().detach_free_list();
    assert_eq!(vmm.allocate(false), None, "allocation from an empty free list");

    for pp in [pp0, pp1, pp2] {
        vmm.frames_mut().free(pp);
    }
    let pp0 = take(vmm);
    let pp1 = take(vmm);
    let pp2 = take(vmm);
    assert!(pp0 != pp1 && pp1 != pp2 && pp0 != pp2, "allocator handed out a frame twice");
    assert_eq!(vmm.allocate(false), None, "allocation from an empty free list");

    unsafe { mapper.fill_frame(pp0.page(), 1) };
    vmm.frames_mut().free(pp0);
    assert_eq!(vmm.allocate(true), Some(pp0), "free list is not last-in first-out");
    let bytes = unsafe { mapper.phys_to_mut::<[u8; PGSIZE as usize]>(pp0.base()) };
    assert!(bytes.iter().all(|&b| b == 0), "zeroing allocation left data behind");

    vmm.frames_mut().reattach_free_list(list);
    for pp in [pp0, pp1, pp2] {
        vmm.frames_mut().free(pp);
    }
    assert_eq!(vmm.frames().free_count(), free, "frames lost");
    info!("Frame allocator check succeeded");
}

/// Run insert, replace, lookup and remove against the kernel directory while
/// memory is deliberately scarce.
///
/// Uses only the low directory slots, which must be empty, and returns them
/// empty.
pub fn check_mappings<M: PhysMapper, U: Mmu>(mm: &mut MemoryManager<'_, M, U>) {
    let vmm = &mut mm.vmm;
    let mapper = vmm.mapper();
    let pgsize = VirtualAddress::new(PGSIZE);
    let zero = VirtualAddress::zero();

    let pp0 = take(vmm);
    let pp1 = take(vmm);
    let pp2 = take(vmm);
    assert!(pp0 != pp1 && pp1 != pp2 && pp0 != pp2, "allocator handed out a frame twice");

    let list = vmm.frames_mut().detach_free_list();
    assert_eq!(vmm.allocate(false), None, "allocation from an empty free list");
    assert!(vmm.lookup(zero).is_none(), "address 0 is mapped");

    // No frame for a page table.
    assert!(vmm.insert(pp1, zero, PageEntryBits::new().with_writable(true)).is_err());

    // pp0 becomes the page table.
    vmm.frames_mut().free(pp0);
    vmm.insert(pp1, zero, PageEntryBits::new().with_writable(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(pd_entry(vmm, 0).next_table(), Some(pp0.page()), "page table is not pp0");
    assert_eq!(frame_of(vmm, 0), Some(pp1));
    assert_eq!(vmm.frames().ref_count(pp1), 1);
    assert_eq!(vmm.frames().ref_count(pp0), 1);

    // Same table, no allocation needed.
    vmm.insert(pp2, pgsize, PageEntryBits::new().with_writable(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(frame_of(vmm, PGSIZE), Some(pp2));
    assert_eq!(vmm.frames().ref_count(pp2), 1);
    assert_eq!(vmm.allocate(false), None, "allocation from an empty free list");

    // Mapping the same frame again keeps a single reference.
    vmm.insert(pp2, pgsize, PageEntryBits::new().with_writable(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(frame_of(vmm, PGSIZE), Some(pp2));
    assert_eq!(vmm.frames().ref_count(pp2), 1);
    assert_eq!(vmm.allocate(false), None, "re-inserted frame went back on the free list");

    let slot = vmm
        .walk(pgsize, false)
        .unwrap_or_else(|| panic!("no page table for {pgsize}"));
    assert_eq!(Some(slot.table()), pd_entry(vmm, PGSIZE).next_table());
    assert_eq!(slot.index(), PtIndex::from(pgsize));

    // Permissions can be widened...
    vmm.insert(pp2, pgsize, PageEntryBits::new().with_writable(true).with_user_access(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(frame_of(vmm, PGSIZE), Some(pp2));
    assert_eq!(vmm.frames().ref_count(pp2), 1);
    assert!(pte_flags(vmm, PGSIZE).user_access());
    assert!(pd_entry(vmm, 0).flags().user_access());

    // ...and narrowed again.
    vmm.insert(pp2, pgsize, PageEntryBits::new().with_writable(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(pte_flags(vmm, PGSIZE).writable());
    assert!(!pte_flags(vmm, PGSIZE).user_access());

    // A second page table would be needed.
    assert!(
        vmm.insert(pp0, VirtualAddress::new(PTSIZE), PageEntryBits::new().with_writable(true))
            .is_err()
    );

    // Replace pp2 by pp1.
    vmm.insert(pp1, pgsize, PageEntryBits::new().with_writable(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert!(!pte_flags(vmm, PGSIZE).user_access());
    assert_eq!(frame_of(vmm, 0), Some(pp1));
    assert_eq!(frame_of(vmm, PGSIZE), Some(pp1));
    assert_eq!(vmm.frames().ref_count(pp1), 2);
    assert_eq!(vmm.frames().ref_count(pp2), 0);
    assert_eq!(vmm.allocate(false), Some(pp2), "replaced frame was not freed");

    // Unmapping one of two mappings keeps the frame.
    vmm.remove(zero);
    assert_eq!(frame_of(vmm, 0), None);
    assert_eq!(frame_of(vmm, PGSIZE), Some(pp1));
    assert_eq!(vmm.frames().ref_count(pp1), 1);
    assert_eq!(vmm.frames().ref_count(pp2), 0);

    vmm.insert(pp1, pgsize, PageEntryBits::new())
        .unwrap_or_else(|e| panic!("{e}"));
    assert_ne!(vmm.frames().ref_count(pp1), 0);
    assert!(vmm.frames().descriptor(pp1).next_free().is_none());

    // Unmapping the last one frees it.
    vmm.remove(pgsize);
    assert_eq!(frame_of(vmm, 0), None);
    assert_eq!(frame_of(vmm, PGSIZE), None);
    assert_eq!(vmm.frames().ref_count(pp1), 0);
    assert_eq!(vmm.frames().ref_count(pp2), 0);
    assert_eq!(vmm.allocate(false), Some(pp1), "unmapped frame was not freed");
    assert_eq!(vmm.allocate(false), None, "allocation from an empty free list");

    // Take the page table back.
    assert_eq!(pd_entry(vmm, 0).next_table(), Some(pp0.page()));
    vmm.address_space().set_pd_entry(PdIndex::new(0), PdEntry::zero());
    assert_eq!(vmm.frames().ref_count(pp0), 1);
    vmm.frames_mut().clear_references(pp0);

    // The walker addresses the right slot in a table it creates.
    vmm.frames_mut().free(pp0);
    let va = VirtualAddress::new(PGSIZE * 1024 + PGSIZE);
    let slot = vmm
        .walk(va, true)
        .unwrap_or_else(|| panic!("no page table for {va}"));
    assert_eq!(Some(slot.table()), pd_entry(vmm, va.as_u32()).next_table());
    assert_eq!(slot.table(), pp0.page());
    assert_eq!(slot.index(), PtIndex::from(va));
    vmm.address_space().set_pd_entry(PdIndex::from(va), PdEntry::zero());
    vmm.frames_mut().clear_references(pp0);

    // New page tables are cleared.
    unsafe { mapper.fill_frame(pp0.page(), 0xFF) };
    vmm.frames_mut().free(pp0);
    assert!(vmm.walk(zero, true).is_some(), "no page table for {zero}");
    let table = unsafe { mapper.phys_to_mut::<PageTable>(pp0.base()) };
    assert!(table.is_empty(), "new page table was not cleared");
    vmm.address_space().set_pd_entry(PdIndex::new(0), PdEntry::zero());
    vmm.frames_mut().clear_references(pp0);

    vmm.frames_mut().reattach_free_list(list);
    for pp in [pp0, pp1, pp2] {
        vmm.frames_mut().free(pp);
    }
    info!("Mapping check succeeded");
}

/// Validate the kernel directory built by bring-up, before it is activated.
pub fn check_kernel_directory<M: PhysMapper, U: Mmu>(mm: &MemoryManager<'_, M, U>) {
    let vmm = &mm.vmm;
    let frame_count = mm.managed_frames();

    let table_size = round_up::<Size4K>(mm.frame_table_size()).unwrap_or(PTSIZE);
    for off in (0..table_size).step_by(PGSIZE as usize) {
        assert_eq!(
            translate(vmm, UPAGES + off),
            Some(mm.frame_table + off),
            "frame table not mapped at UPAGES + {off:#x}"
        );
    }

    let env_size = round_up::<Size4K>(ENVIRONMENTS_SIZE).unwrap_or(PTSIZE);
    for off in (0..env_size).step_by(PGSIZE as usize) {
        assert_eq!(
            translate(vmm, UENVS + off),
            Some(mm.environments + off),
            "environments not mapped at UENVS + {off:#x}"
        );
    }

    for n in 0..frame_count {
        let pa = FrameNumber::new(n).base();
        assert_eq!(
            translate(vmm, KERNBASE + pa.as_u32()),
            Some(pa),
            "physical memory not mapped at KERNBASE + {pa}"
        );
    }

    for off in (0..KSTKSIZE).step_by(PGSIZE as usize) {
        assert_eq!(
            translate(vmm, KSTACKTOP - KSTKSIZE + off),
            Some(mm.boot_stack + off),
            "boot stack not mapped below KSTACKTOP"
        );
    }
    for off in (0..KSTKGAP).step_by(PGSIZE as usize) {
        let va = KSTACKTOP - KSTKSIZE - KSTKGAP + off;
        assert_eq!(translate(vmm, va), None, "stack guard page {va:#010x} is mapped");
    }
    assert_eq!(translate(vmm, KSTACKTOP - PTSIZE), None, "MMIO window is mapped");

    let window = RecursiveWindow::kernel();
    assert_eq!(
        vmm.address_space().pd_entry(window.slot()),
        window.entry_for(mm.root()),
        "recursive slot does not link the directory"
    );

    let required = [
        PdIndex::from(VirtualAddress::new(UVPT)),
        PdIndex::from(VirtualAddress::new(KSTACKTOP - 1)),
        PdIndex::from(VirtualAddress::new(UPAGES)),
        PdIndex::from(VirtualAddress::new(UENVS)),
    ];
    let kernel = PdIndex::from(VirtualAddress::new(KERNBASE));
    for pdx in PdIndex::all() {
        let pde = vmm.address_space().pd_entry(pdx);
        if required.contains(&pdx) {
            assert!(pde.is_present(), "directory slot {pdx:?} is missing");
        } else if pdx >= kernel {
            assert!(pde.is_present(), "kernel slot {pdx:?} is missing");
            assert!(pde.flags().writable(), "kernel slot {pdx:?} is read-only");
        } else {
            assert_eq!(pde.raw(), 0, "slot {pdx:?} should be empty");
        }
    }
    info!("Kernel directory check succeeded");
}

/// Map, write and read pages through the active kernel directory.
pub fn check_installed_directory<M: PhysMapper, U: Mmu>(mm: &mut MemoryManager<'_, M, U>) {
    let vmm = &mut mm.vmm;
    let mapper = vmm.mapper();
    let pgsize = VirtualAddress::new(PGSIZE);

    let pp0 = take(vmm);
    let pp1 = take(vmm);
    let pp2 = take(vmm);
    vmm.frames_mut().free(pp0);
    unsafe {
        mapper.fill_frame(pp1.page(), 1);
        mapper.fill_frame(pp2.page(), 2);
    }

    vmm.insert(pp1, pgsize, PageEntryBits::new().with_writable(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(vmm.frames().ref_count(pp1), 1);
    assert_eq!(read_word(vmm, pgsize), 0x0101_0101);

    vmm.insert(pp2, pgsize, PageEntryBits::new().with_writable(true))
        .unwrap_or_else(|e| panic!("{e}"));
    assert_eq!(read_word(vmm, pgsize), 0x0202_0202);
    assert_eq!(vmm.frames().ref_count(pp2), 1);
    assert_eq!(vmm.frames().ref_count(pp1), 0);

    write_word(vmm, pgsize, 0x0303_0303);
    assert_eq!(unsafe { *mapper.phys_to_mut::<u32>(pp2.base()) }, 0x0303_0303);

    vmm.remove(pgsize);
    assert_eq!(vmm.frames().ref_count(pp2), 0);

    assert_eq!(pd_entry(vmm, 0).next_table(), Some(pp0.page()));
    vmm.address_space().set_pd_entry(PdIndex::new(0), PdEntry::zero());
    vmm.invalidate(pgsize);
    assert_eq!(vmm.frames().ref_count(pp0), 1);
    vmm.frames_mut().clear_references(pp0);
    vmm.frames_mut().free(pp0);
    info!("Installed directory check succeeded");
}
