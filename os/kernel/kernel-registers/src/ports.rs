//! # x86 I/O Port Access
//!
//! Byte-wide access to the legacy I/O port space via the `in` and `out`
//! instructions. The memory core only needs it for the CMOS/NVRAM index and
//! data ports (`0x70`/`0x71`); the QEMU debug console uses it as well.

/// Write one byte to an I/O port (x86).
///
/// Uses `out dx, al`.
///
/// # Safety
/// You must uphold **all** of the following:
/// - **Privilege:** Execute at CPL0 **or** have I/O permission (IOPL/IO bitmap)
///   that allows access to `port`. Otherwise the CPU raises `#GP`.
/// - **Correct port:** `port` must belong to the intended device and be in a
///   valid state for this write. Selecting a CMOS register and then not reading
///   it leaves the RTC's index latched on the wrong register.
/// - **Ordering:** `out` orders with respect to other I/O instructions but is
///   **not** a general memory fence.
#[inline]
pub unsafe fn outb(port: u16, val: u8) {
    unsafe {
        core::arch::asm!(
            "out dx, al",
            in("dx") port,
            in("al") val,
            options(nomem, nostack, preserves_flags)
        );
    }
}

/// Read one byte from an I/O port (x86).
///
/// Uses `in al, dx`.
///
/// # Safety
/// - **Privilege:** Execute at CPL0 **or** have I/O permission for `port`;
///   otherwise the CPU raises `#GP`.
/// - **Correct port:** `port` must be a readable register of the intended
///   device; some registers have read side effects.
#[inline]
pub unsafe fn inb(port: u16) -> u8 {
    let mut v: u8;
    unsafe {
        core::arch::asm!(
            "in al, dx",
            in("dx") port,
            out("al") v,
            options(nomem, nostack, preserves_flags)
        );
    }
    v
}
