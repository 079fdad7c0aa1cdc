use crate::qemu_fmt::dbg_putc;

/// Byte-oriented output device behind the standard output files.
pub trait Console: Send + Sync {
    fn write(&self, bytes: &[u8]);
}

/// [`Console`] on the QEMU debug port.
#[derive(Debug, Default, Copy, Clone)]
pub struct QemuConsole;

impl Console for QemuConsole {
    fn write(&self, bytes: &[u8]) {
        bytes.iter().copied().for_each(dbg_putc);
    }
}
