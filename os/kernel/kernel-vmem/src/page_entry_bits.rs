use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// Represents a single 32-bit x86 paging entry in its raw bitfield form.
///
/// The same layout is used by page directory entries (PDE) and page table
/// entries (PTE) under two-level, non-PAE paging. Each bit corresponds to a
/// hardware-defined flag or the frame field as specified by the IA-32 manuals.
///
/// ### Bit layout
///
/// | Bits      | Name / Mnemonic   | Meaning |
/// |-----------|-------------------|----------|
/// | 0         | `P` (present)     | Valid entry if set |
/// | 1         | `W`               | Writable if set |
/// | 2         | `U`               | User-mode accessible if set |
/// | 3         | `PWT`             | Write-through caching |
/// | 4         | `PCD`             | Disable caching |
/// | 5         | `A`               | Accessed |
/// | 6         | `D`               | Dirty (PTE only) |
/// | 7         | `PS`              | 4 MiB page (PDE only, unused here) |
/// | 8         | `G`               | Global (PTE only) |
/// | 9–11      | `AVAIL`           | Reserved for OS use |
/// | 12–31     | `addr`            | Physical frame bits [31:12] |
///
/// ### Notes
/// - A non-present entry carries no address. Entries are cleared to all-zero
///   rather than by dropping `P` alone.
/// - Permissions are the intersection over the walk: a directory entry must
///   be at least as permissive as any table entry below it.
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalAddress;
/// # use kernel_vmem::PageEntryBits;
/// let e = PageEntryBits::new()
///     .with_present(true)
///     .with_writable(true)
///     .with_physical_address(PhysicalAddress::new(0x0012_3000));
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// ```
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (W, bit 1).
    ///
    /// Clear for read-only. Supervisor writes honor this only with `CR0.WP` set.
    pub writable: bool,

    /// User/Supervisor (U, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// Would turn a PDE into a 4 MiB leaf. The memory core never sets it.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame bits [31:12].
    #[bits(20)]
    frame_31_12: u32,
}

impl PageEntryBits {
    /// Mask selecting the flag bits (everything below the frame field).
    pub const FLAGS_MASK: u32 = 0xFFF;

    #[inline]
    pub const fn set_physical_address(&mut self, phys: PhysicalAddress) {
        self.set_frame_31_12(phys.as_u32() >> 12);
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_address(mut self, phys: PhysicalAddress) -> Self {
        self.set_physical_address(phys);
        self
    }

    #[inline]
    #[must_use]
    pub const fn physical_address(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.frame_31_12() << 12)
    }

    /// The flag bits of this entry with the frame field cleared.
    #[inline]
    #[must_use]
    pub const fn permissions(self) -> Self {
        Self::from_bits(self.into_bits() & Self::FLAGS_MASK)
    }

    /// Kernel read/write, user no access.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_writable(true)
    }

    /// Read-only for both kernel and user.
    #[inline]
    #[must_use]
    pub const fn user_ro() -> Self {
        Self::new().with_user_access(true)
    }

    /// Read/write for both kernel and user.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::new().with_user_access(true).with_writable(true)
    }

    /// Whether every permission set in `required` is also set here.
    #[inline]
    #[must_use]
    pub const fn contains(self, required: Self) -> bool {
        let r = required.into_bits() & Self::FLAGS_MASK;
        self.into_bits() & r == r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_positions_match_hardware() {
        assert_eq!(PageEntryBits::new().with_present(true).into_bits(), 0x001);
        assert_eq!(PageEntryBits::new().with_writable(true).into_bits(), 0x002);
        assert_eq!(PageEntryBits::new().with_user_access(true).into_bits(), 0x004);
        assert_eq!(PageEntryBits::new().with_write_through(true).into_bits(), 0x008);
        assert_eq!(PageEntryBits::new().with_cache_disabled(true).into_bits(), 0x010);
        assert_eq!(PageEntryBits::new().with_accessed(true).into_bits(), 0x020);
        assert_eq!(PageEntryBits::new().with_dirty(true).into_bits(), 0x040);
        assert_eq!(PageEntryBits::new().with_large_page(true).into_bits(), 0x080);
        assert_eq!(PageEntryBits::new().with_global_translation(true).into_bits(), 0x100);
        assert_eq!(PageEntryBits::new().with_os_available(0b111).into_bits(), 0xE00);
    }

    #[test]
    fn permissions_strip_the_frame() {
        let e = PageEntryBits::user_rw()
            .with_present(true)
            .with_physical_address(PhysicalAddress::new(0xABCD_E000));
        assert_eq!(e.physical_address().as_u32(), 0xABCD_E000);
        assert_eq!(e.permissions().into_bits(), 0x007);
        assert!(e.contains(PageEntryBits::user_ro()));
        assert!(!PageEntryBits::user_ro().contains(PageEntryBits::kernel_rw()));
    }
}
