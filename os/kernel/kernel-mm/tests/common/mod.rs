#![allow(dead_code)]

use kernel_alloc::phys_mapper::HostedPhysMemory;
use kernel_alloc::probe::{NVRAM_BASE_LO, NVRAM_EXT_LO, NVRAM_EXT16_LO, Nvram};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualPage};
use kernel_mm::{BootImage, MemoryManager, initialize_memory};
use kernel_qemu::QemuLogger;
use kernel_vmem::Mmu;
use log::LevelFilter;

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Trace);

/// A 64 KiB kernel image loaded at 1 MiB, with its stack in the last 8 pages.
pub const IMAGE: BootImage = BootImage {
    kernel_end: PhysicalAddress::new(0x0011_0000),
    boot_stack: PhysicalAddress::new(0x0010_8000),
};

/// CMOS contents as the BIOS would leave them.
pub struct FakeNvram([u8; 128]);

impl FakeNvram {
    pub fn new(base_kib: u16, ext_kib: u16, ext16_blocks: u16) -> Self {
        let mut regs = [0; 128];
        for (reg, value) in [
            (NVRAM_BASE_LO, base_kib),
            (NVRAM_EXT_LO, ext_kib),
            (NVRAM_EXT16_LO, ext16_blocks),
        ] {
            let [lo, hi] = value.to_le_bytes();
            regs[reg as usize] = lo;
            regs[reg as usize + 1] = hi;
        }
        Self(regs)
    }

    /// 640 KiB base memory and 3 MiB above 1 MiB: 4 MiB in total.
    pub fn four_megabytes() -> Self {
        Self::new(640, 3072, 0)
    }
}

impl Nvram for FakeNvram {
    fn read(&mut self, register: u8) -> u8 {
        self.0[register as usize]
    }
}

/// Records what the memory core asks of the MMU.
#[derive(Default)]
pub struct RecordingMmu {
    pub active_root: Option<PhysicalPage<Size4K>>,
    pub paging_enabled: bool,
    pub invalidated: Vec<VirtualPage<Size4K>>,
}

impl Mmu for RecordingMmu {
    unsafe fn activate(&mut self, root: PhysicalPage<Size4K>) {
        self.active_root = Some(root);
    }

    unsafe fn enable_paging(&mut self) {
        assert!(self.active_root.is_some(), "paging enabled without a directory");
        self.paging_enabled = true;
    }

    fn invalidate_page(&mut self, page: VirtualPage<Size4K>) {
        self.invalidated.push(page);
    }
}

pub fn memory() -> HostedPhysMemory {
    HostedPhysMemory::new(1024)
}

/// Route records through the debug console sink; a no-op on the host.
pub fn install_logger() {
    let _ = LOGGER.init();
}

pub fn boot(mem: &HostedPhysMemory) -> MemoryManager<'_, HostedPhysMemory, RecordingMmu> {
    install_logger();
    unsafe {
        initialize_memory(
            mem,
            &mut FakeNvram::four_megabytes(),
            RecordingMmu::default(),
            IMAGE,
        )
    }
}
