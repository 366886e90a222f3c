//! # TLB Maintenance

use kernel_memory_addresses::{Size4K, VirtualPage};

/// Invalidate the cached translation of a single page.
///
/// Must follow every change to a live page table entry that the processor
/// may already have cached. Without the `asm` feature, or off x86, this is a
/// no-op so that the paging code can run against simulated memory.
///
/// # Safety
/// Executes `invlpg`, which is privileged: the caller must be running at CPL0.
#[inline]
pub unsafe fn invlpg(page: VirtualPage<Size4K>) {
    #[cfg(all(feature = "asm", target_arch = "x86"))]
    unsafe {
        let va = page.base().as_u32() as usize;
        core::arch::asm!("invlpg [{}]", in(reg) va, options(nostack, preserves_flags));
    }

    #[cfg(not(all(feature = "asm", target_arch = "x86")))]
    let _ = page;
}
