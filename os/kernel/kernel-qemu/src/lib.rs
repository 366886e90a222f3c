//! # QEMU Debug Console
//!
//! Diagnostic output for the memory core while it runs under QEMU. Bring-up
//! reports memory totals, region mappings and check results through the `log`
//! facade; this crate provides the sink that carries those records to the host.
//!
//! ## Output Mechanism
//! ```text
//! log::info!(..)  /  qemu_trace!(..)
//!     ↓
//! QemuLogger (log::Log)  →  QemuSink (fmt::Write)
//!     ↓
//! dbg_putc() → I/O port 0x402
//!     ↓
//! QEMU -debugcon (stdio, file, ...)
//! ```
//!
//! ## Feature System
//!
//! With the default `enabled` feature on a bare-metal x86 target every byte
//! goes out through `out 0x402, al`. Without it, and in hosted builds such as
//! tests, the sink swallows its input.
//!
//! ## Usage
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::{LevelFilter, info};
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.init().expect("logger initialization");
//! info!("physical memory: 131072K available");
//! ```
//!
//! Capture on the host with `qemu-system-i386 ... -debugcon stdio`.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// The port number for QEMU's debug port.
    #[cfg_attr(
        not(all(
            feature = "enabled",
            target_os = "none",
            any(target_arch = "x86", target_arch = "x86_64")
        )),
        allow(dead_code)
    )]
    const QEMU_DEBUG_PORT: u16 = 0x402;

    /// Write a single character to QEMU's debug port.
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        #[cfg(all(
            feature = "enabled",
            target_os = "none",
            any(target_arch = "x86", target_arch = "x86_64")
        ))]
        unsafe {
            kernel_registers::ports::outb(QEMU_DEBUG_PORT, c);
        }

        #[cfg(not(all(
            feature = "enabled",
            target_os = "none",
            any(target_arch = "x86", target_arch = "x86_64")
        )))]
        let _ = c;
    }

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            for b in s.bytes() {
                dbg_putc(b);
            }
            Ok(())
        }
    }

    #[doc(hidden)]
    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best-effort output.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
