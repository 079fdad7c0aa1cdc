//! # QEMU Debug Console
//!
//! Byte sink and `log` backend on QEMU's debug port (`0x402`,
//! `-debugcon stdio` on the host side). The same port serves as the console
//! behind the standard output and error files of every process.
//!
//! ```text
//! log::info!  ──► QemuLogger ─┐
//! qemu_trace! ────────────────┼──► QemuSink ──► out 0x402 ──► host
//! stdout/stderr ─► QemuConsole┘
//! ```
//!
//! Port writes are only compiled for bare-metal `x86_64` with the `enabled`
//! feature. Everywhere else (hosted unit tests included) the sink discards
//! output.
//!
//! ```rust,no_run
//! use log::LevelFilter;
//!
//! kernel_qemu::init_logger(LevelFilter::Debug).ok();
//! log::info!("stage2 up");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod console;
mod logger;

pub use console::{Console, QemuConsole};
pub use logger::{QemuLogger, init_logger};

#[doc(hidden)]
pub mod qemu_fmt {
    use core::fmt::{self, Write};

    /// QEMU's debug port.
    pub const QEMU_DEBUG_PORT: u16 = 0x402;

    #[cfg(all(feature = "enabled", target_arch = "x86_64", target_os = "none"))]
    #[allow(clippy::inline_always)]
    #[inline(always)]
    pub fn dbg_putc(c: u8) {
        // SAFETY: port 0x402 is write-only and side-effect free outside QEMU.
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") QEMU_DEBUG_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
    }

    #[cfg(not(all(feature = "enabled", target_arch = "x86_64", target_os = "none")))]
    #[inline]
    pub const fn dbg_putc(_c: u8) {}

    pub struct QemuSink;

    impl Write for QemuSink {
        #[inline]
        fn write_str(&mut self, s: &str) -> fmt::Result {
            s.bytes().for_each(dbg_putc);
            Ok(())
        }
    }

    #[inline]
    pub fn qemu_write(args: fmt::Arguments) {
        // Best effort.
        let _ = fmt::write(&mut QemuSink, args);
    }
}

/// Formatted write straight to the debug port, bypassing `log`.
///
/// Used on paths where the logger may itself be unusable (fatal faults).
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::qemu_fmt::qemu_write(core::format_args!($($arg)*));
    }};
}
