//! File objects and the per-process descriptor table.

use crate::thread::Thread;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_heaps::{HeapError, IdHeap};
use kernel_info::memory::FD_LIMIT;
use kernel_sync::RwLock;
use log::error;

/// Syscall-style return: non-negative count or negated errno.
pub type SysReturn = i64;

/// Invoked once, synchronously, with the operation's result.
pub type IoCompletion = Box<dyn FnOnce(&Thread, SysReturn) + Send>;

pub const O_RDWR: u32 = 2;
pub const EPOLLOUT: u32 = 0x004;

pub trait File: Send + Sync {
    fn read(
        &self,
        dest: &mut [u8],
        offset: u64,
        thread: &Thread,
        completion: Option<IoCompletion>,
    ) -> SysReturn;

    fn write(
        &self,
        src: &[u8],
        offset: u64,
        thread: &Thread,
        completion: Option<IoCompletion>,
    ) -> SysReturn;

    /// Readiness mask for poll/epoll.
    fn events(&self, thread: &Thread) -> u32;

    fn close(&self) -> SysReturn;

    /// Open flags (`O_*`).
    fn flags(&self) -> u32;
}

/// Descriptor numbers from an [`IdHeap`] over `[0, FD_LIMIT)` and a growable
/// slot vector.
///
/// A number is only ever released after its slot has been cleared, so a
/// concurrent allocation can never observe a stale file under a fresh fd.
pub struct FdTable {
    ids: IdHeap,
    files: RwLock<Vec<Option<Arc<dyn File>>>>,
}

impl FdTable {
    /// # Errors
    /// The id heap could not be set up.
    pub fn new(initial_capacity: usize) -> Result<Self, HeapError> {
        let mut files = Vec::with_capacity(initial_capacity);
        files.resize_with(initial_capacity, || None);
        Ok(Self {
            ids: IdHeap::new(0, FD_LIMIT, 1)?,
            files: RwLock::new(files),
        })
    }

    /// Install `file` under the lowest free descriptor.
    pub fn allocate(&self, file: Arc<dyn File>) -> Option<u64> {
        let Some(fd) = self.ids.alloc(1) else {
            error!("fail; maxed out");
            return None;
        };
        self.install(fd, file)
    }

    /// Install `file` under the lowest free descriptor `>= min`.
    pub fn allocate_gte(&self, min: u64, file: Arc<dyn File>) -> Option<u64> {
        let Some(fd) = self.ids.alloc_gte(1, min) else {
            error!("failed to allocate fd >= {min}");
            return None;
        };
        self.install(fd, file)
    }

    fn install(&self, fd: u64, file: Arc<dyn File>) -> Option<u64> {
        let mut files = self.files.write();
        let Some(slot) = grow_to(&mut files, fd) else {
            drop(files);
            self.ids.dealloc(fd, 1);
            error!("fd {fd} exceeds the table");
            return None;
        };
        *slot = Some(file);
        Some(fd)
    }

    /// Clear the slot, then release the number. Returns the file that was
    /// installed, if any.
    pub fn deallocate(&self, fd: u64) -> Option<Arc<dyn File>> {
        let index = usize::try_from(fd).ok()?;
        let file = self.files.write().get_mut(index).and_then(Option::take);
        if file.is_some() {
            self.ids.dealloc(fd, 1);
        }
        file
    }

    #[must_use]
    pub fn get(&self, fd: u64) -> Option<Arc<dyn File>> {
        let index = usize::try_from(fd).ok()?;
        self.files.read().get(index).cloned().flatten()
    }

    /// Number of live descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().iter().filter(|f| f.is_some()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current slot capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.files.read().len()
    }
}

/// Slot for `fd`, growing the vector if the allocator allows it.
fn grow_to(
    files: &mut Vec<Option<Arc<dyn File>>>,
    fd: u64,
) -> Option<&mut Option<Arc<dyn File>>> {
    let index = usize::try_from(fd).ok()?;
    if index >= files.len() {
        files.try_reserve(index + 1 - files.len()).ok()?;
        files.resize_with(index + 1, || None);
    }
    files.get_mut(index)
}

impl core::fmt::Debug for FdTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FdTable")
            .field("live", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFile;

    impl File for NullFile {
        fn read(&self, _: &mut [u8], _: u64, _: &Thread, _: Option<IoCompletion>) -> SysReturn {
            0
        }

        fn write(&self, src: &[u8], _: u64, _: &Thread, _: Option<IoCompletion>) -> SysReturn {
            src.len() as SysReturn
        }

        fn events(&self, _: &Thread) -> u32 {
            0
        }

        fn close(&self) -> SysReturn {
            0
        }

        fn flags(&self) -> u32 {
            O_RDWR
        }
    }

    fn file() -> Arc<dyn File> {
        Arc::new(NullFile)
    }

    #[test]
    fn lowest_free_number_is_reused() {
        let fds = FdTable::new(4).unwrap();
        assert_eq!(fds.allocate(file()), Some(0));
        assert_eq!(fds.allocate(file()), Some(1));
        assert_eq!(fds.allocate(file()), Some(2));
        assert!(fds.deallocate(1).is_some());
        assert!(fds.get(1).is_none());
        assert_eq!(fds.allocate(file()), Some(1));
        assert_eq!(fds.len(), 3);
    }

    #[test]
    fn gte_respects_floor_and_grows_table() {
        let fds = FdTable::new(2).unwrap();
        assert_eq!(fds.allocate_gte(10, file()), Some(10));
        assert!(fds.capacity() >= 11);
        assert!(fds.get(10).is_some());
        assert_eq!(fds.allocate_gte(10, file()), Some(11));
        assert_eq!(fds.allocate(file()), Some(0));
    }

    #[test]
    fn gte_is_bounded_by_fd_limit() {
        let fds = FdTable::new(2).unwrap();
        assert_eq!(fds.allocate_gte(u64::MAX - 1, file()), None);
        assert_eq!(fds.capacity(), 2);
        assert!(fds.is_empty());

        assert_eq!(fds.allocate_gte(FD_LIMIT - 1, file()), Some(FD_LIMIT - 1));
        assert_eq!(fds.allocate_gte(FD_LIMIT - 1, file()), None);
        assert_eq!(fds.len(), 1);
        assert_eq!(fds.allocate(file()), Some(0));
    }

    #[test]
    fn deallocate_of_empty_slot_is_harmless() {
        let fds = FdTable::new(1).unwrap();
        assert!(fds.deallocate(0).is_none());
        assert!(fds.deallocate(500).is_none());
        assert_eq!(fds.allocate(file()), Some(0));
    }
}
