//! Sector access to the boot filesystem image.

use crate::DiskError;
use alloc::boxed::Box;
use alloc::sync::Arc;
use log::trace;

/// Completion of a disk request, invoked exactly once.
pub type StatusHandler = Box<dyn FnOnce(Result<(), DiskError>) + Send>;

/// Raw sector transfer provided by the platform (BIOS services on real
/// hardware).
pub trait SectorIo: Send + Sync {
    /// Read `dest.len()` bytes at `absolute_offset` on the boot disk,
    /// bouncing through the low-memory buffer at `transfer`.
    ///
    /// # Errors
    /// The device reported a failure.
    fn read_sectors(&self, transfer: u64, dest: &mut [u8], absolute_offset: u64)
    -> Result<(), DiskError>;
}

/// The read/write pair the filesystem mounts on.
pub trait BlockDevice: Send + Sync {
    /// Read `dest.len()` bytes at filesystem-relative `offset`.
    fn read(&self, dest: &mut [u8], offset: u64, completion: StatusHandler);

    fn write(&self, src: &[u8], offset: u64, completion: StatusHandler);
}

/// Filesystem image on the boot disk, `fs_base` bytes in.
///
/// Writes are accepted and dropped; nothing is persisted during boot.
pub struct Stage2Disk {
    fs_base: u64,
    transfer: u64,
    io: Arc<dyn SectorIo>,
}

impl Stage2Disk {
    #[must_use]
    pub fn new(fs_base: u64, transfer: u64, io: Arc<dyn SectorIo>) -> Self {
        Self {
            fs_base,
            transfer,
            io,
        }
    }

    #[must_use]
    pub const fn fs_base(&self) -> u64 {
        self.fs_base
    }
}

impl BlockDevice for Stage2Disk {
    fn read(&self, dest: &mut [u8], offset: u64, completion: StatusHandler) {
        let absolute = self.fs_base + offset;
        trace!("disk read {:#x} bytes at {absolute:#x}", dest.len());
        completion(self.io.read_sectors(self.transfer, dest, absolute));
    }

    fn write(&self, src: &[u8], offset: u64, completion: StatusHandler) {
        trace!("disk write of {:#x} bytes at {offset:#x} dropped", src.len());
        completion(Ok(()));
    }
}

impl core::fmt::Debug for Stage2Disk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stage2Disk")
            .field("fs_base", &format_args!("{:#x}", self.fs_base))
            .field("transfer", &format_args!("{:#x}", self.transfer))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        reads: Mutex<Vec<(u64, usize, u64)>>,
    }

    impl SectorIo for Recorder {
        fn read_sectors(&self, transfer: u64, dest: &mut [u8], absolute_offset: u64)
        -> Result<(), DiskError> {
            self.reads.lock().unwrap().push((transfer, dest.len(), absolute_offset));
            if absolute_offset >= 0x10_0000 {
                return Err(DiskError {
                    offset: absolute_offset,
                    length: dest.len() as u64,
                });
            }
            dest.fill(0xab);
            Ok(())
        }
    }

    #[test]
    fn reads_are_offset_by_the_filesystem_base() {
        let io = Arc::new(Recorder::default());
        let disk = Stage2Disk::new(0x5000, 0x1010, io.clone());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut buf = [0u8; 16];
        let seen = calls.clone();
        disk.read(&mut buf, 0x200, Box::new(move |status| {
            assert_eq!(status, Ok(()));
            seen.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(buf, [0xab; 16]);
        assert_eq!(*io.reads.lock().unwrap(), vec![(0x1010, 16, 0x5200)]);
    }

    #[test]
    fn device_errors_reach_the_completion() {
        let disk = Stage2Disk::new(0x10_0000, 0x1000, Arc::new(Recorder::default()));
        let mut buf = [0u8; 4];
        let status = Arc::new(Mutex::new(None));
        let sink = status.clone();
        disk.read(&mut buf, 8, Box::new(move |s| *sink.lock().unwrap() = Some(s)));
        assert_eq!(
            *status.lock().unwrap(),
            Some(Err(DiskError { offset: 0x10_0008, length: 4 }))
        );
    }

    #[test]
    fn writes_complete_without_touching_the_device() {
        let io = Arc::new(Recorder::default());
        let disk = Stage2Disk::new(0x5000, 0x1000, io.clone());
        let done = Arc::new(AtomicUsize::new(0));
        let seen = done.clone();
        disk.write(&[1, 2, 3], 0, Box::new(move |s| {
            assert!(s.is_ok());
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(io.reads.lock().unwrap().is_empty());
    }
}
