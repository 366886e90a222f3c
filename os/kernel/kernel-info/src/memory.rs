//! # Memory Layout

/// Bytes mapped by a page.
pub const PGSIZE: u32 = 4096;

/// log2(PGSIZE).
pub const PGSHIFT: u32 = 12;

/// Page directory entries per page directory.
pub const NPDENTRIES: u32 = 1024;

/// Page table entries per page table.
pub const NPTENTRIES: u32 = 1024;

/// Bytes mapped by a page directory entry (one page table).
pub const PTSIZE: u32 = PGSIZE * NPTENTRIES;

/// log2(PTSIZE).
pub const PTSHIFT: u32 = 22;

/// All physical memory is mapped at this address.
pub const KERNBASE: u32 = 0xF000_0000;

/// Top of the boot CPU's kernel stack.
pub const KSTACKTOP: u32 = KERNBASE;

/// Size of a kernel stack.
pub const KSTKSIZE: u32 = 8 * PGSIZE;

/// Size of the unmapped guard gap below a kernel stack.
pub const KSTKGAP: u32 = 8 * PGSIZE;

/// Memory-mapped I/O window, top.
pub const MMIOLIM: u32 = KSTACKTOP - PTSIZE;

/// Memory-mapped I/O window, base.
pub const MMIOBASE: u32 = MMIOLIM - PTSIZE;

/// Highest address user code may see (exclusive).
pub const ULIM: u32 = MMIOBASE;

/// User read-only view of the page tables, provided by the recursive
/// directory slot.
pub const UVPT: u32 = ULIM - PTSIZE;

/// User read-only view of the frame descriptor table.
pub const UPAGES: u32 = UVPT - PTSIZE;

/// User read-only view of the environment table.
pub const UENVS: u32 = UPAGES - PTSIZE;

/// Top of user-accessible VM; everything above is read-only or kernel-only.
pub const UTOP: u32 = UENVS;

/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;

/// Top of the normal user stack, one guard page below the exception stack.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE;

/// Where user programs are linked.
pub const UTEXT: u32 = 2 * PTSIZE;

/// Scratch window for temporary user mappings.
pub const UTEMP: u32 = PTSIZE;

/// Scratch page for the user page-fault handler.
pub const PFTEMP: u32 = UTEMP + PTSIZE - PGSIZE;

/// Start of the legacy I/O hole.
pub const IOPHYSMEM: u32 = 0x000A_0000;

/// Start of extended memory; the loader places the kernel image here.
pub const EXTPHYSMEM: u32 = 0x0010_0000;

/// Number of environment records backing the `UENVS` window.
pub const NENV: u32 = 1 << 10;

/// Size in bytes of one environment record.
pub const ENV_RECORD_SIZE: u32 = 96;

const _: () = {
    assert!(PTSIZE == 1 << PTSHIFT);
    assert!(PGSIZE == 1 << PGSHIFT);
    assert!(KSTKSIZE.is_multiple_of(PGSIZE));
    assert!(KSTACKTOP - KSTKSIZE - KSTKGAP > MMIOLIM);
    assert!(MMIOLIM == 0xEFC0_0000);
    assert!(UVPT == 0xEF40_0000);
    assert!(UPAGES == 0xEF00_0000);
    assert!(UENVS == 0xEEC0_0000);
    assert!(KERNBASE.is_multiple_of(PTSIZE));
    assert!(NENV * ENV_RECORD_SIZE <= PTSIZE);
    assert!(IOPHYSMEM < EXTPHYSMEM);
};
