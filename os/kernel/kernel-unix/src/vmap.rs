//! Per-process virtual memory areas.

use crate::error::VmapError;
use alloc::collections::BTreeMap;
use core::fmt;
use kernel_info::memory::PAGE_SIZE;

bitflags::bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct VmapFlags: u32 {
        /// Created by an mmap-family call.
        const MMAP      = 1 << 0;
        /// Not backed by a file; demand pages are zero filled.
        const ANONYMOUS = 1 << 1;
        const WRITABLE  = 1 << 2;
        const EXEC      = 1 << 3;
    }
}

impl fmt::Display for VmapFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, name) in [
            (Self::MMAP, "mmap "),
            (Self::ANONYMOUS, "anonymous "),
            (Self::WRITABLE, "writable "),
            (Self::EXEC, "executable "),
        ] {
            if self.contains(flag) {
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

/// One virtual memory area `[start, end)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Vmap {
    pub start: u64,
    pub end: u64,
    pub flags: VmapFlags,
    /// File offset of `start` for file-backed areas.
    pub backing: Option<u64>,
}

impl Vmap {
    #[must_use]
    pub const fn new(start: u64, end: u64, flags: VmapFlags) -> Self {
        Self {
            start,
            end,
            flags,
            backing: None,
        }
    }

    #[must_use]
    pub const fn with_backing(mut self, file_offset: u64) -> Self {
        self.backing = Some(file_offset);
        self
    }

    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Non-overlapping vmaps ordered by start address.
#[derive(Debug, Default, Clone)]
pub struct VmapSet {
    by_start: BTreeMap<u64, Vmap>,
}

impl VmapSet {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            by_start: BTreeMap::new(),
        }
    }

    /// # Errors
    /// Empty or unaligned bounds, or overlap with an existing vmap.
    pub fn insert(&mut self, vmap: Vmap) -> Result<(), VmapError> {
        let Vmap { start, end, .. } = vmap;
        if vmap.is_empty() {
            return Err(VmapError::Empty { start, end });
        }
        for bound in [start, end] {
            if !bound.is_multiple_of(PAGE_SIZE) {
                return Err(VmapError::Unaligned(bound));
            }
        }
        // The only candidate for overlap is the last vmap starting below `end`.
        if let Some((_, prev)) = self.by_start.range(..end).next_back()
            && prev.end > start
        {
            return Err(VmapError::Overlap { start, end });
        }
        self.by_start.insert(start, vmap);
        Ok(())
    }

    /// Remove the vmap starting at `start`.
    pub fn remove(&mut self, start: u64) -> Option<Vmap> {
        self.by_start.remove(&start)
    }

    /// The vmap covering `addr`.
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<&Vmap> {
        self.by_start
            .range(..=addr)
            .next_back()
            .map(|(_, v)| v)
            .filter(|v| v.contains(addr))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vmap> {
        self.by_start.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_start.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_start.is_empty()
    }
}
