use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualPage};

/// The processor's paging controls, as far as the memory core uses them.
///
/// The hardware implementation is [`HardwareMmu`]; tests substitute a double
/// that records what it was asked to do.
pub trait Mmu {
    /// Make the directory in `root` the active one.
    ///
    /// # Safety
    /// The directory must map the currently executing code, stack and data at
    /// the addresses they are used from.
    unsafe fn activate(&mut self, root: PhysicalPage<Size4K>);

    /// Turn on paging and the protection features the kernel relies on.
    ///
    /// # Safety
    /// A directory satisfying [`activate`](Self::activate)'s contract must be active.
    unsafe fn enable_paging(&mut self);

    /// Drop any cached translation for `page`.
    fn invalidate_page(&mut self, page: VirtualPage<Size4K>);
}

/// [`Mmu`] backed by `CR3`, `CR0` and `invlpg`.
#[cfg(target_arch = "x86")]
pub struct HardwareMmu {
    _private: (),
}

#[cfg(target_arch = "x86")]
impl HardwareMmu {
    /// # Safety
    /// Must only be constructed by code running at CPL0.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_arch = "x86")]
impl Mmu for HardwareMmu {
    unsafe fn activate(&mut self, root: PhysicalPage<Size4K>) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::cr3::Cr3;

        unsafe { Cr3::from_directory_phys(root.base(), false, false).store_unsafe() };
    }

    unsafe fn enable_paging(&mut self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};

        unsafe {
            let cr0 = Cr0::load_unsafe();
            cr0.with_paging_enabled().store_unsafe();
        }
    }

    fn invalidate_page(&mut self, page: VirtualPage<Size4K>) {
        // CPL0 is guaranteed by construction.
        unsafe { kernel_registers::tlb::invlpg(page) };
    }
}
