//! # Typed 32-bit x86 Registers
//!
//! Control registers used by the memory core (`CR0`, `CR3`), the legacy
//! port I/O primitives and TLB maintenance.
//!
//! The register layouts are plain [`bitfield`](bitfield_struct::bitfield)
//! values and can be built and inspected anywhere. The instructions that move
//! them into the CPU are only compiled with the `asm` feature on a 32-bit
//! `x86` target; [`ports`] also builds for `x86_64`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(feature = "cr0")]
pub mod cr0;

#[cfg(feature = "cr3")]
pub mod cr3;

#[cfg(all(feature = "ports", any(target_arch = "x86", target_arch = "x86_64")))]
pub mod ports;

pub mod tlb;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}
