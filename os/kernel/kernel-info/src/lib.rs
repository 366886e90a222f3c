//! # Kernel Address-Space Layout
//!
//! This crate is the single source of the fixed memory layout shared by the
//! memory core and everything built against it. The values are architectural
//! contracts: user programs, the loader and the environment subsystem all
//! assume them bit for bit.
//!
//! ## Virtual Memory Architecture (32-bit, two-level paging)
//!
//! ```text
//!  4 GiB ┌──────────────────────────────┐
//!        │  Remapped physical memory    │  RW/--
//!        │  (KERNBASE + pa)             │
//! KERNBASE, KSTACKTOP ─────────────────┤ 0xF000_0000
//!        │  CPU0 kernel stack           │  RW/--  KSTKSIZE
//!        ├──────────────────────────────┤
//!        │  Invalid memory (guard)      │  --/--  KSTKGAP
//!        ├──────────────────────────────┤
//!        :  unused                      :
//! MMIOLIM ─────────────────────────────┤ 0xEFC0_0000
//!        │  Memory-mapped I/O           │  RW/--  PTSIZE
//! ULIM, MMIOBASE ──────────────────────┤ 0xEF80_0000
//!        │  Current page table (UVPT)   │  R-/R-  PTSIZE
//! UVPT ────────────────────────────────┤ 0xEF40_0000
//!        │  Frame descriptors (RO)      │  R-/R-  PTSIZE
//! UPAGES ──────────────────────────────┤ 0xEF00_0000
//!        │  Environments (RO)           │  R-/R-  PTSIZE
//! UTOP, UENVS, UXSTACKTOP ─────────────┤ 0xEEC0_0000
//!        │  User exception stack        │  RW/RW  PGSIZE
//!        ├──────────────────────────────┤ 0xEEBF_F000
//!        │  Empty memory (guard)        │  --/--  PGSIZE
//! USTACKTOP ───────────────────────────┤ 0xEEBF_E000
//!        │  Normal user stack           │  RW/RW
//!        :  ...                         :
//! UTEXT ───────────────────────────────┤ 0x0080_0000
//! PFTEMP ──────────────────────────────┤ 0x007F_F000
//! UTEMP ───────────────────────────────┤ 0x0040_0000
//!        │  Empty memory                │
//!      0 └──────────────────────────────┘
//! ```
//!
//! ## Physical Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌────────────────────────────┐
//!             │ Base memory (frame 0 kept) │
//! IOPHYSMEM   ├────────────────────────────┤ 0x000A_0000
//!             │ I/O hole (VGA, BIOS ROM)   │
//! EXTPHYSMEM  ├────────────────────────────┤ 0x0010_0000
//!             │ Kernel image, boot data    │
//!             ├────────────────────────────┤ boot allocator cursor
//!             │ Managed by the frame table │
//!             └────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
