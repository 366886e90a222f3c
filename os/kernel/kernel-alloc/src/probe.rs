//! # Physical Memory Probe
//!
//! The amount of installed memory is read from the battery-backed CMOS RAM of
//! the MC146818 real-time clock, where the BIOS leaves it in three 16-bit
//! little-endian fields.

use log::info;

/// CMOS register holding base memory in KiB.
pub const NVRAM_BASE_LO: u8 = 0x15;
/// CMOS register holding extended memory (1 to 16 MiB) in KiB.
pub const NVRAM_EXT_LO: u8 = 0x17;
/// CMOS register holding extended memory above 16 MiB in 64 KiB blocks.
pub const NVRAM_EXT16_LO: u8 = 0x34;

/// Byte-wide access to CMOS registers.
pub trait Nvram {
    fn read(&mut self, register: u8) -> u8;

    /// Read the 16-bit value stored at `register` and `register + 1`.
    fn read_u16(&mut self, register: u8) -> u16 {
        u16::from(self.read(register)) | (u16::from(self.read(register + 1)) << 8)
    }
}

/// The real-time clock's CMOS RAM, reached through ports `0x70`/`0x71`.
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub struct Mc146818 {
    _private: (),
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl Mc146818 {
    const INDEX_PORT: u16 = 0x70;
    const DATA_PORT: u16 = 0x71;

    /// # Safety
    /// Port I/O requires CPL0 (or a matching I/O privilege level).
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
impl Nvram for Mc146818 {
    fn read(&mut self, register: u8) -> u8 {
        use kernel_registers::ports::{inb, outb};

        unsafe {
            outb(Self::INDEX_PORT, register);
            inb(Self::DATA_PORT)
        }
    }
}

/// Installed memory as reported by the CMOS.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PhysicalMemory {
    total_kib: u32,
    base_kib: u32,
}

impl PhysicalMemory {
    #[must_use]
    pub const fn from_kib(total_kib: u32, base_kib: u32) -> Self {
        Self {
            total_kib,
            base_kib,
        }
    }

    #[inline]
    #[must_use]
    pub const fn total_kib(&self) -> u32 {
        self.total_kib
    }

    #[inline]
    #[must_use]
    pub const fn base_kib(&self) -> u32 {
        self.base_kib
    }

    #[inline]
    #[must_use]
    pub const fn extended_kib(&self) -> u32 {
        self.total_kib.saturating_sub(self.base_kib)
    }

    /// Number of 4 KiB frames of physical memory.
    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.total_kib / 4
    }

    /// Number of 4 KiB frames of base (sub-640 KiB) memory.
    #[inline]
    #[must_use]
    pub const fn base_frames(&self) -> u32 {
        self.base_kib / 4
    }
}

/// Ask the CMOS how much memory is installed.
///
/// The most specific field wins: memory above 16 MiB if any is reported,
/// otherwise memory between 1 and 16 MiB, otherwise base memory alone.
pub fn detect_memory<N: Nvram>(nvram: &mut N) -> PhysicalMemory {
    let base_kib = u32::from(nvram.read_u16(NVRAM_BASE_LO));
    let ext_kib = u32::from(nvram.read_u16(NVRAM_EXT_LO));
    let ext16_kib = u32::from(nvram.read_u16(NVRAM_EXT16_LO)) * 64;

    let total_kib = if ext16_kib != 0 {
        16 * 1024 + ext16_kib
    } else if ext_kib != 0 {
        1024 + ext_kib
    } else {
        base_kib
    };

    let memory = PhysicalMemory::from_kib(total_kib, base_kib);
    info!(
        "Physical memory: {}K available, base = {}K, extended = {}K",
        memory.total_kib(),
        memory.base_kib(),
        memory.extended_kib()
    );
    memory
}
